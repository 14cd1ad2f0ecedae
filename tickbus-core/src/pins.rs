//! Assignment of logical signal names to physical pins, e.g. `swclk=A0,swdio=A1`.
use crate::error::PinError;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Highest pin index within a bank.
pub const MAX_INDEX: u8 = 7;

/// A physical pin, addressed by bank letter (`A` or `B`) and index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pin {
    pub bank: char,
    pub index: u8,
}

impl FromStr for Pin {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let bank = chars
            .next()
            .map(|bank| bank.to_ascii_uppercase())
            .filter(|bank| matches!(bank, 'A' | 'B'))
            .ok_or_else(|| PinError::InvalidPin(s.to_owned()))?;
        let index = chars
            .as_str()
            .parse::<u8>()
            .ok()
            .filter(|index| *index <= MAX_INDEX)
            .ok_or_else(|| PinError::InvalidPin(s.to_owned()))?;
        Ok(Pin { bank, index })
    }
}

impl Display for Pin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.bank, self.index)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PinMap {
    entries: Vec<(String, Pin)>,
}

impl PinMap {
    pub fn get(&self, name: &str) -> Option<Pin> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, pin)| *pin)
    }

    pub fn require(&self, name: &str) -> Result<Pin, PinError> {
        self.get(name)
            .ok_or_else(|| PinError::MissingName(name.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Pin)> {
        self.entries.iter().map(|(name, pin)| (name.as_str(), *pin))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for PinMap {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries: Vec<(String, Pin)> = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (name, pin) = entry
                .split_once('=')
                .ok_or_else(|| PinError::MalformedEntry(entry.to_owned()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(PinError::MalformedEntry(entry.to_owned()));
            }
            let pin = pin.trim().parse::<Pin>()?;
            if entries.iter().any(|(existing, _)| existing == name) {
                return Err(PinError::DuplicateName(name.to_owned()));
            }
            if entries.iter().any(|(_, existing)| *existing == pin) {
                return Err(PinError::DuplicatePin(pin.to_string()));
            }
            entries.push((name.to_owned(), pin));
        }
        Ok(PinMap { entries })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_pin_map() {
        let map: PinMap = "swclk=A0, swdio=b7".parse().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("swclk"), Some(Pin { bank: 'A', index: 0 }));
        assert_eq!(map.require("swdio").unwrap().to_string(), "B7");
        assert_eq!(
            map.require("nreset"),
            Err(PinError::MissingName("nreset".to_owned()))
        );
    }

    #[test]
    fn reject_invalid_maps() {
        assert!(matches!(
            "swclk".parse::<PinMap>(),
            Err(PinError::MalformedEntry(_))
        ));
        assert!(matches!(
            "swclk=0A".parse::<PinMap>(),
            Err(PinError::InvalidPin(_))
        ));
        assert!(matches!(
            "swclk=A8".parse::<PinMap>(),
            Err(PinError::InvalidPin(_))
        ));
        assert!(matches!(
            "swclk=C0".parse::<PinMap>(),
            Err(PinError::InvalidPin(_))
        ));
        assert!(matches!(
            "swclk=A0,swclk=A1".parse::<PinMap>(),
            Err(PinError::DuplicateName(_))
        ));
        assert!(matches!(
            "swclk=A0,swdio=a0".parse::<PinMap>(),
            Err(PinError::DuplicatePin(_))
        ));
        assert!("".parse::<PinMap>().unwrap().is_empty());
    }
}
