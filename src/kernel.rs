// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{cmp::Ordering, fmt};

/// A kernel version as it appears in package names, e.g. `5.4.0-92.103` or
/// `3.10.0-957.el7`. The original string is kept for display; ordering works
/// on the numeric components only.
#[derive(Debug, Clone, Default)]
pub struct Version {
    original: String,
    components: Vec<u64>,
}

impl Version {
    pub fn new(v: &str) -> Self {
        Version {
            original: v.to_string(),
            components: split_into_ints(v),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.original.is_empty()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    // Lexicographic over the numeric components; on an equal prefix the
    // shorter list is less. Non-numeric tails never participate, so
    // `3.10.0-957` is not less than `3.10.0-957.el7`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

fn split_into_ints(s: &str) -> Vec<u64> {
    let mut nums = Vec::new();
    for part in s.split(|c| c == '.' || c == '-' || c == '~') {
        match part.parse::<u64>() {
            Ok(n) => nums.push(n),
            Err(_) => break,
        }
    }
    nums
}

#[cfg(test)]
mod tests {
    use super::Version;

    #[test]
    fn version_not_less_than_itself() {
        for v in &["3.10.0-957", "5.4.0-92.103~18.04.2", "", "4.18.0-80.el8"] {
            let a = Version::new(v);
            let b = Version::new(v);
            assert!(!(a < b), "{} must not be less than itself", v);
        }
    }

    #[test]
    fn non_numeric_tail_is_ignored() {
        let v1 = Version::new("3.10.0-957");
        let v2 = Version::new("3.10.0-957.el7");
        assert!(!(v1 < v2), "{} must not be less than {}", v1, v2);
    }

    #[test]
    fn smaller_numeric_component_orders_first() {
        let v2 = Version::new("3.10.0-957.el7");
        let v3 = Version::new("3.10.0-956");
        assert!(v3 < v2, "{} must be less than {}", v3, v2);
    }

    #[test]
    fn shorter_component_list_orders_first() {
        let v1 = Version::new("3.10.0-957");
        let v4 = Version::new("3.10.0-957.100");
        assert!(v1 < v4, "{} must be less than {}", v1, v4);
    }

    #[test]
    fn zero_value_is_the_empty_string() {
        assert!(Version::new("").is_zero());
        assert!(!Version::new("5.4.0").is_zero());
    }

    #[test]
    fn display_keeps_the_original_string() {
        assert_eq!(Version::new("5.4.0-92.103~18.04.2").to_string(), "5.4.0-92.103~18.04.2");
    }
}
