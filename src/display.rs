// display.rs

use std::fmt;

use chrono::NaiveDateTime;
use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::measure::Reading;

pub const LCD_ADDR: u8 = 0x3E;
pub const LCD_WIDTH: usize = 16;

const PREFIX_CMD: u8 = 0x80;
const PREFIX_DATA: u8 = 0x40;

const CMD_FUNCTION_SET: u8 = 0x38;
const CMD_DISPLAY_ON: u8 = 0x0C;
const CMD_CLEAR: u8 = 0x01;
const CMD_LINE0: u8 = 0x80;
const CMD_LINE1: u8 = 0xC0;

/// Truncate or right-pad with spaces to exactly `width` characters.
pub fn pad_right(text: &str, width: usize) -> String {
    let mut s: String = text.chars().take(width).collect();
    let n = s.chars().count();
    s.extend(std::iter::repeat(' ').take(width - n));
    s
}

/// Map a character to the byte sent to the display; anything outside
/// printable ASCII becomes `?`.
pub fn lcd_byte(c: char) -> u8 {
    match c as u32 {
        32..=126 => c as u8,
        _ => b'?',
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    AirTemp,
    HumPress,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 2] = [DisplayMode::AirTemp, DisplayMode::HumPress];

    pub fn from_index(idx: usize) -> Self {
        Self::ALL[idx % Self::ALL.len()]
    }
}

pub fn clock_line(local: &NaiveDateTime) -> String {
    local.format("%H:%M %d-%m-%Y").to_string()
}

pub fn sensor_line(mode: DisplayMode, r: &Reading) -> String {
    match mode {
        DisplayMode::AirTemp => format!("{:.2} C {} Air", r.temperature, r.iaq),
        DisplayMode::HumPress => format!("{:.2}% {:.0} hPa", r.humidity, r.pressure),
    }
}

#[derive(Debug)]
pub enum DisplayError<E> {
    Bus(E),
    NoLine(u8),
}

impl<E: fmt::Debug> fmt::Display for DisplayError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::Bus(e) => write!(f, "display bus error: {e:?}"),
            DisplayError::NoLine(l) => write!(f, "display has no line {l}"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for DisplayError<E> {}

/// Two-line character LCD on I2C (AiP31068 / ST7032 style controller).
pub struct Lcd<I2C> {
    i2c: I2C,
    addr: u8,
}

impl<I2C: I2c> Lcd<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Lcd { i2c, addr: LCD_ADDR }
    }

    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<(), DisplayError<I2C::Error>> {
        self.cmd(CMD_FUNCTION_SET)?;
        self.cmd(CMD_DISPLAY_ON)?;
        self.cmd(CMD_CLEAR)?;
        delay.delay_ms(2);
        Ok(())
    }

    fn cmd(&mut self, cmd: u8) -> Result<(), DisplayError<I2C::Error>> {
        self.i2c.write(self.addr, &[PREFIX_CMD, cmd]).map_err(DisplayError::Bus)
    }

    fn data(&mut self, b: u8) -> Result<(), DisplayError<I2C::Error>> {
        self.i2c.write(self.addr, &[PREFIX_DATA, b]).map_err(DisplayError::Bus)
    }

    pub fn write_line(&mut self, line: u8, text: &str) -> Result<(), DisplayError<I2C::Error>> {
        let addr = match line {
            0 => CMD_LINE0,
            1 => CMD_LINE1,
            l => return Err(DisplayError::NoLine(l)),
        };
        self.cmd(addr)?;
        for c in pad_right(text, LCD_WIDTH).chars() {
            self.data(lcd_byte(c))?;
        }
        Ok(())
    }

    pub fn show(&mut self, line0: &str, line1: &str) -> Result<(), DisplayError<I2C::Error>> {
        self.write_line(0, line0)?;
        self.write_line(1, line1)
    }

    #[cfg(test)]
    pub(crate) fn bus(&self) -> &I2C {
        &self.i2c
    }
}


// EOF
