// Address domain model - one leaf of the complaints catalog
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub model_year: i32,
    pub make: String,
    pub model: String,
}

impl Address {
    /// Returns `None` when make or model is empty, since such an entry has no
    /// catalog beneath it.
    pub fn new(model_year: i32, make: &str, model: &str) -> Option<Self> {
        if make.trim().is_empty() || model.trim().is_empty() {
            return None;
        }
        Some(Self {
            model_year,
            make: make.to_string(),
            model: model.to_string(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.model_year, self.make, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_parts_are_rejected() {
        assert!(Address::new(2020, "", "CIVIC").is_none());
        assert!(Address::new(2020, "HONDA", "  ").is_none());

        let address = Address::new(2020, "HONDA", "CIVIC").unwrap();
        assert_eq!(address.to_string(), "2020 HONDA CIVIC");
    }
}
