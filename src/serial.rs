// Copyright 2018 Steven Sheffey
// This file is part of packet_captor_sakura.
//
// packet_captor_sakura is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// packet_captor_sakura is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with packet_captor_sakura.  If not, see <https:// www.gnu.org/licenses/>.

//! 16-bit serial number arithmetic (RFC 1982), used for uTP sequence numbers.

use std::fmt;

/// A 16-bit sequence number compared under RFC 1982 serial-number rules
/// rather than plain integer ordering, so that wrap-around near `0xffff`
/// behaves correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seq16(pub u16);

impl Seq16 {
    pub fn new(value: u16) -> Self {
        Seq16(value)
    }

    /// Returns `self + 1`, wrapping at 2^16.
    pub fn next(self) -> Self {
        Seq16(self.0.wrapping_add(1))
    }

    /// RFC 1982 `<` for width 16: `a != b && ((a < b && b - a < 2^15) || (a > b && a - b > 2^15))`.
    pub fn serial_lt(self, other: Self) -> bool {
        let (a, b) = (self.0, other.0);
        if a == b {
            return false;
        }
        if a < b {
            b.wrapping_sub(a) < 0x8000
        } else {
            a.wrapping_sub(b) > 0x8000
        }
    }

    pub fn serial_gt(self, other: Self) -> bool {
        other.serial_lt(self)
    }
}

impl fmt::Display for Seq16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Seq16 {
    fn from(value: u16) -> Self {
        Seq16(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_wraps() {
        assert_eq!(Seq16(65535).next(), Seq16(0));
        assert_eq!(Seq16(0).next(), Seq16(1));
    }

    #[test]
    fn test_serial_lt_simple() {
        assert!(Seq16(1).serial_lt(Seq16(2)));
        assert!(!Seq16(2).serial_lt(Seq16(1)));
        assert!(!Seq16(5).serial_lt(Seq16(5)));
    }

    #[test]
    fn test_serial_lt_wraps_around() {
        // 65535 is "before" 0 in serial arithmetic.
        assert!(Seq16(65535).serial_lt(Seq16(0)));
        assert!(!Seq16(0).serial_lt(Seq16(65535)));
        // 65534 < 2 (distance 4, well under 2^15)
        assert!(Seq16(65534).serial_lt(Seq16(2)));
        assert!(!Seq16(2).serial_lt(Seq16(65534)));
    }

    #[test]
    fn test_serial_gt_is_inverse_of_lt() {
        assert!(Seq16(2).serial_gt(Seq16(1)));
        assert!(Seq16(0).serial_gt(Seq16(65535)));
    }
}
