use crate::OwnerId;
use serde::{Deserialize, Serialize};

/// Bytes of a response body kept with a check result.
pub const CONTENT_SAMPLE_LEN: usize = 10_240;

/// Link-check state for one identifier's target URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCheck {
    pub identifier: String,
    pub owner: OwnerId,
    pub target: String,
    /// Zero until the first check.
    pub last_check_time: u64,
    pub is_bad: bool,
    /// Consecutive failed checks.
    pub num_failures: u32,
    pub return_code: Option<i32>,
    pub mime_type: String,
    pub content_sample: Vec<u8>,
    pub error: String,
    /// Scratch flag for table synchronization.
    pub is_visited: bool,
}

impl LinkCheck {
    pub fn new(identifier: impl Into<String>, owner: OwnerId, target: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            owner,
            target: target.into(),
            last_check_time: 0,
            is_bad: false,
            num_failures: 0,
            return_code: None,
            mime_type: String::new(),
            content_sample: Vec::new(),
            error: String::new(),
            is_visited: true,
        }
    }

    pub const fn is_good(&self) -> bool {
        !self.is_bad
    }

    /// Points the row at a new owner/target and forgets its history.
    pub fn reset(&mut self, owner: OwnerId, target: impl Into<String>) {
        *self = Self::new(std::mem::take(&mut self.identifier), owner, target);
    }

    /// Records the outcome of one check.
    pub fn apply(&mut self, result: &CheckResult, now: u64) {
        self.last_check_time = now;
        self.return_code = result.return_code;
        self.mime_type.clone_from(&result.mime_type);
        self.content_sample.clone_from(&result.content_sample);
        if result.success {
            self.is_bad = false;
            self.num_failures = 0;
            self.error.clear();
        } else {
            self.is_bad = true;
            self.num_failures = self.num_failures.saturating_add(1);
            self.error.clone_from(&result.error);
        }
    }
}

/// The outcome of one GET against a target URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckResult {
    pub success: bool,
    pub return_code: Option<i32>,
    pub mime_type: String,
    pub content_sample: Vec<u8>,
    pub error: String,
}

impl CheckResult {
    pub fn failed(return_code: Option<i32>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            return_code,
            error: error.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_a_success() {
        let mut check = LinkCheck::new("ark:/99999/fk4x", OwnerId::new("u"), "http://a/");
        for i in 1..=3 {
            check.apply(&CheckResult::failed(Some(500), "server error"), 100 + i);
            assert_eq!(check.num_failures, i as u32);
            assert!(check.is_bad);
        }
        assert_eq!(check.last_check_time, 103);

        let ok = CheckResult {
            success: true,
            return_code: Some(200),
            mime_type: "text/html".into(),
            ..CheckResult::default()
        };
        check.apply(&ok, 200);
        assert!(check.is_good());
        assert_eq!(check.num_failures, 0);
        assert!(check.error.is_empty());
    }

    #[test]
    fn reset_forgets_history() {
        let mut check = LinkCheck::new("ark:/99999/fk4x", OwnerId::new("u"), "http://a/");
        check.apply(&CheckResult::failed(None, "timeout"), 5);
        check.is_visited = false;
        check.reset(OwnerId::new("v"), "http://b/");
        assert_eq!(check, LinkCheck::new("ark:/99999/fk4x", OwnerId::new("v"), "http://b/"));
    }
}
