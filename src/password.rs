use std::fmt;
use std::io::BufRead;
use rand::Rng;

use crate::errors::{Error, Result};

/// Number of wordlist words in a generated password.
pub const PASSWORD_WORDS: usize = 3;

/// Highest slot id a generated password will use.
pub const MAX_SLOT: u16 = 9999;

/// Embedded wordlist for password material. 128 entries, so each word
/// contributes 7 bits of entropy.
const WORDS: &[&str] = &[
    "acid", "acorn", "amber", "anchor", "apple", "arrow", "atlas", "autumn",
    "badge", "bamboo", "basil", "beacon", "berry", "birch", "bison", "blaze",
    "bloom", "bolt", "border", "branch", "brass", "breeze", "brick", "bridge",
    "bronze", "brook", "button", "cabin", "cactus", "camera", "candle", "canyon",
    "carbon", "castle", "cedar", "chalk", "cherry", "cliff", "clover", "cobalt",
    "comet", "copper", "coral", "cotton", "crane", "crater", "cricket", "crystal",
    "daisy", "dawn", "delta", "denim", "desert", "drift", "eagle", "ember",
    "falcon", "feather", "fern", "flint", "forest", "fossil", "frost", "galaxy",
    "garnet", "geyser", "ginger", "glacier", "granite", "gravel", "grove", "harbor",
    "hazel", "heron", "hollow", "honey", "horizon", "island", "ivory", "jasper",
    "juniper", "kettle", "lagoon", "lantern", "laurel", "lava", "lemon", "lilac",
    "linen", "lotus", "lunar", "maple", "marble", "meadow", "mesa", "mint",
    "mirror", "morning", "moss", "mountain", "nectar", "north", "oasis", "ocean",
    "olive", "onyx", "orchid", "otter", "paper", "pebble", "pepper", "pine",
    "planet", "plume", "prairie", "prism", "quartz", "raven", "reef", "ridge",
    "river", "salmon", "sierra", "silver", "summit", "thunder", "tulip", "willow",
];

/// A single-use transfer credential of the form `N-word1-word2-word3`.
///
/// The leading integer is the relay slot id used to pair the two peers; the
/// full password string is the PAKE input, so every character matters for
/// authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPassword {
    slot: u16,
    words: Vec<String>,
}

impl TransferPassword {
    /// Generate a fresh password with a random slot and wordlist material.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let slot = rng.gen_range(1..=MAX_SLOT);
        let words = (0..PASSWORD_WORDS)
            .map(|_| WORDS[rng.gen_range(0..WORDS.len())].to_string())
            .collect();
        Self { slot, words }
    }

    /// Parse a password the receiver was given out-of-band.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let mut parts = trimmed.split('-');

        let slot_part = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| Error::Password("empty password".into()))?;
        let slot: u16 = slot_part
            .parse()
            .map_err(|_| Error::Password(format!("bad slot id '{}'", slot_part)))?;
        if slot == 0 {
            return Err(Error::Password("slot id must be positive".into()));
        }

        let words: Vec<String> = parts.map(str::to_string).collect();
        if words.is_empty() || words.iter().any(String::is_empty) {
            return Err(Error::Password(
                "expected at least one word after the slot id".into(),
            ));
        }

        Ok(Self { slot, words })
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// The bytes fed into the PAKE as the low-entropy shared secret.
    pub fn pake_input(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for TransferPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.slot, self.words.join("-"))
    }
}

/// Prompt on stdin until a well-formed password is entered.
pub fn prompt_for_password() -> Result<TransferPassword> {
    let stdin = std::io::stdin();
    loop {
        println!("Enter the transfer password:");
        let mut input = String::new();
        stdin
            .lock()
            .read_line(&mut input)
            .map_err(Error::Transport)?;
        match TransferPassword::parse(&input) {
            Ok(password) => return Ok(password),
            Err(e) => println!("{}. Please try again.", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_roundtrip() {
        let password = TransferPassword::generate();
        let parsed = TransferPassword::parse(&password.to_string()).unwrap();
        assert_eq!(parsed, password);
    }

    #[test]
    fn parse_known_password() {
        let password = TransferPassword::parse("3-sample-pair").unwrap();
        assert_eq!(password.slot(), 3);
        assert_eq!(password.to_string(), "3-sample-pair");
    }

    #[test]
    fn parse_accepts_surrounding_whitespace() {
        let password = TransferPassword::parse("  17-otter-basil\n").unwrap();
        assert_eq!(password.slot(), 17);
    }

    #[test]
    fn parse_rejects_zero_slot() {
        assert!(TransferPassword::parse("0-otter-basil").is_err());
    }

    #[test]
    fn parse_rejects_missing_words() {
        assert!(TransferPassword::parse("42").is_err());
        assert!(TransferPassword::parse("42-").is_err());
        assert!(TransferPassword::parse("42-otter--basil").is_err());
    }

    #[test]
    fn parse_rejects_non_numeric_slot() {
        assert!(TransferPassword::parse("otter-basil").is_err());
        assert!(TransferPassword::parse("-otter-basil").is_err());
    }

    #[test]
    fn generated_slot_in_range() {
        for _ in 0..100 {
            let password = TransferPassword::generate();
            assert!(password.slot() >= 1);
            assert!(password.slot() <= MAX_SLOT);
        }
    }

    #[test]
    fn pake_input_covers_whole_password() {
        let password = TransferPassword::parse("9-cedar-flint").unwrap();
        assert_eq!(password.pake_input(), b"9-cedar-flint".to_vec());
    }
}
