use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputUsage {
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputUsage {
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: InputUsage,
    pub output: OutputUsage,
    pub total: u64,
}

fn sum_optional(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

impl TokenUsage {
    /// Field-wise sum; an optional subfield stays `None` iff both operands'
    /// subfields are `None`.
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            input: InputUsage {
                total: self.input.total + other.input.total,
                cache_creation: sum_optional(self.input.cache_creation, other.input.cache_creation),
                cache_read: sum_optional(self.input.cache_read, other.input.cache_read),
            },
            output: OutputUsage {
                total: self.output.total + other.output.total,
                thinking: sum_optional(self.output.thinking, other.output.thinking),
            },
            total: self.total + other.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_totals_field_wise() {
        let a = TokenUsage {
            input: InputUsage {
                total: 10,
                cache_creation: Some(2),
                cache_read: None,
            },
            output: OutputUsage {
                total: 5,
                thinking: None,
            },
            total: 15,
        };
        let b = TokenUsage {
            input: InputUsage {
                total: 3,
                cache_creation: None,
                cache_read: Some(1),
            },
            output: OutputUsage {
                total: 2,
                thinking: Some(4),
            },
            total: 5,
        };

        let summed = a.add(&b);
        assert_eq!(summed.total, 20);
        assert_eq!(summed.input.total, 13);
        assert_eq!(summed.input.cache_creation, Some(2));
        assert_eq!(summed.input.cache_read, Some(1));
        assert_eq!(summed.output.thinking, Some(4));
    }

    #[test]
    fn optional_subfield_stays_undefined_when_both_operands_are() {
        let a = TokenUsage::default();
        let b = TokenUsage::default();
        let summed = a.add(&b);
        assert_eq!(summed.input.cache_creation, None);
        assert_eq!(summed.input.cache_read, None);
        assert_eq!(summed.output.thinking, None);
    }
}
