//! Safety Validator
//!
//! Two independent, side-effect free gates. The basic keyword check admits
//! candidates into ranking and guards the executor; the enhanced check gates
//! execution and feeds the audit trail.

pub mod injection;
pub mod integrity;
pub mod query_guards;

pub use injection::*;
pub use integrity::*;
pub use query_guards::*;

use crate::config::SafetyConfig;
use crate::error::Result;
use lazy_static::lazy_static;

pub struct SafetyValidator {
    guards: QueryGuards,
    enhanced: EnhancedValidator,
}

impl SafetyValidator {
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        Ok(Self {
            guards: QueryGuards::new(&config.blocked_keywords)?,
            enhanced: EnhancedValidator::new(config)?,
        })
    }

    pub fn is_safe(&self, sql: &str) -> bool {
        self.guards.is_safe(sql)
    }

    pub fn blocked_keyword(&self, sql: &str) -> Option<String> {
        self.guards.blocked_keyword(sql)
    }

    pub fn validate(&self, sql: &str) -> ValidationReport {
        self.enhanced.validate(sql)
    }
}

lazy_static! {
    static ref DEFAULT_VALIDATOR: SafetyValidator =
        SafetyValidator::new(&SafetyConfig::default()).expect("default safety config compiles");
}

/// Basic check with the default blocklist
pub fn is_safe(sql: &str) -> bool {
    DEFAULT_VALIDATOR.is_safe(sql)
}

/// Enhanced check with the default blocklists and injection shapes
pub fn validate(sql: &str) -> ValidationReport {
    DEFAULT_VALIDATOR.validate(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gates_are_independent() {
        // Passes the basic gate, fails the enhanced one
        assert!(is_safe("EXEC xp_cmdshell"));
        assert!(!validate("EXEC xp_cmdshell").safe);

        // Fails both
        assert!(!is_safe("DROP TABLE t"));
        assert!(!validate("DROP TABLE t").safe);
    }

    #[test]
    fn test_custom_blocklist() {
        let config = SafetyConfig {
            blocked_keywords: vec!["COPY".to_string()],
            ..SafetyConfig::default()
        };
        let validator = SafetyValidator::new(&config).unwrap();
        assert!(!validator.is_safe("copy t to '/tmp/x'"));
        assert!(validator.is_safe("DELETE FROM t"));
    }
}
