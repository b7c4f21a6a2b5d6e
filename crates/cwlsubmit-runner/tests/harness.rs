#![allow(dead_code)]
use assert_cmd::Command as AssertCommand;
use cwlsubmit_test_utils::harness::TestContext;
use std::ops::{Deref, DerefMut};

pub struct TestHarness {
    pub context: TestContext,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            context: TestContext::new(),
        }
    }

    pub fn cmd(&self) -> AssertCommand {
        let mut cmd = AssertCommand::new(env!("CARGO_BIN_EXE_cwl-submit"));
        cmd.env("XDG_CONFIG_HOME", &self.context.config_dir);
        cmd.env("XDG_CACHE_HOME", self.context.test_root.join("cache"));
        cmd.env("RUST_BACKTRACE", "1");
        cmd.env("NO_COLOR", "1");
        cmd.env("CWLSUBMIT_LOG_LEVEL", "DEBUG");
        cmd
    }

    /// First container request or job UUID printed by a command.
    pub fn submitted_uuid(stdout: &[u8]) -> String {
        String::from_utf8_lossy(stdout)
            .split_whitespace()
            .find(|t| t.starts_with("zzzzz-xvhdp-") || t.starts_with("zzzzz-8i9sb-"))
            .expect("output must name the submitted work")
            .to_string()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestHarness {
    type Target = TestContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl DerefMut for TestHarness {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.context
    }
}
