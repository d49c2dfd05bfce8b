#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fs;
use std::panic::{AssertUnwindSafe, UnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const TEST_LOG_SCHEMA_VERSION: &str = "fwdjax.test-log.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    Strict,
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLogEnv {
    pub rust_version: String,
    pub os: String,
    pub cargo_target_dir: String,
    pub timestamp_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TestPhaseTimings {
    pub setup_ms: u64,
    pub execute_ms: u64,
    pub verify_ms: u64,
    pub teardown_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLogV1 {
    pub schema_version: String,
    pub test_id: String,
    pub fixture_id: String,
    pub seed: Option<u64>,
    pub mode: TestMode,
    pub env: TestLogEnv,
    pub artifact_refs: Vec<String>,
    pub result: TestResult,
    pub duration_ms: u64,
    pub details: Option<String>,
    pub phase_timings: TestPhaseTimings,
}

impl TestLogV1 {
    #[must_use]
    pub fn unit(
        test_id: impl Into<String>,
        fixture_id: impl Into<String>,
        mode: TestMode,
        result: TestResult,
    ) -> Self {
        Self {
            schema_version: TEST_LOG_SCHEMA_VERSION.to_owned(),
            test_id: test_id.into(),
            fixture_id: fixture_id.into(),
            seed: capture_proptest_seed(),
            mode,
            env: capture_env(),
            artifact_refs: Vec::new(),
            result,
            duration_ms: 0,
            details: None,
            phase_timings: TestPhaseTimings::default(),
        }
    }
}

/// Identifies the crate a logged test belongs to and where its logs land.
#[derive(Debug, Clone)]
pub struct LoggedSuite {
    pub suite_id: &'static str,
    pub crate_name: &'static str,
    pub log_root: PathBuf,
}

impl LoggedSuite {
    /// `manifest_dir` is the calling crate's `CARGO_MANIFEST_DIR`. Logs go to
    /// `$FWD_TEST_LOG_DIR/<suite>` when set, else `<workspace>/artifacts/testing/logs/<suite>`.
    #[must_use]
    pub fn new(suite_id: &'static str, crate_name: &'static str, manifest_dir: &str) -> Self {
        let base = std::env::var_os("FWD_TEST_LOG_DIR").map_or_else(
            || {
                PathBuf::from(manifest_dir)
                    .join("../..")
                    .join("artifacts")
                    .join("testing")
                    .join("logs")
            },
            PathBuf::from,
        );
        Self {
            suite_id,
            crate_name,
            log_root: base.join(suite_id),
        }
    }

    #[must_use]
    pub fn log_path(&self, test_id: &str) -> PathBuf {
        self.log_root
            .join(format!("{}.json", test_id.replace("::", "__")))
    }

    #[must_use]
    pub fn replay_command(&self, test_id: &str) -> String {
        format!(
            "cargo test -p {} {test_id} -- --exact --nocapture",
            self.crate_name
        )
    }

    /// Run `body`, record a [`TestLogV1`] for it, then re-raise any failure.
    ///
    /// The body returns extra artifact references on success or a failure
    /// detail on error; panics inside the body are captured and resumed after
    /// the log is written.
    pub fn run<Fixture, F>(
        &self,
        module_path: &str,
        test_name: &str,
        fixture: &Fixture,
        mode: TestMode,
        body: F,
    ) where
        Fixture: Serialize,
        F: FnOnce() -> Result<Vec<String>, String> + UnwindSafe,
    {
        let overall_start = Instant::now();
        let setup_start = Instant::now();
        let fixture_id = fixture_id_from_json(fixture).unwrap_or_else(|_| "unhashable".to_owned());
        let test_id = test_id(module_path, test_name);
        let mut log = TestLogV1::unit(test_id.clone(), fixture_id, mode, TestResult::Fail);
        log.phase_timings.setup_ms = duration_ms(setup_start);

        let execute_start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(body));
        log.phase_timings.execute_ms = duration_ms(execute_start);

        let verify_start = Instant::now();
        let mut panic_payload: Option<Box<dyn Any + Send>> = None;
        let mut failure_detail: Option<String> = None;
        let replay = format!("replay: {}", self.replay_command(&test_id));

        match outcome {
            Ok(Ok(mut artifact_refs)) => {
                log.result = TestResult::Pass;
                artifact_refs.push(replay);
                log.artifact_refs = artifact_refs;
                log.details = Some(format!("suite_id={};result=pass", self.suite_id));
            }
            Ok(Err(detail)) => {
                failure_detail = Some(detail.clone());
                log.artifact_refs = vec![replay];
                log.details = Some(detail);
            }
            Err(payload) => {
                let detail = panic_payload_to_string(payload.as_ref());
                failure_detail = Some(detail.clone());
                log.artifact_refs = vec![replay];
                log.details = Some(detail);
                panic_payload = Some(payload);
            }
        }
        log.phase_timings.verify_ms = duration_ms(verify_start);

        let log_path = self.log_path(&test_id);
        log.artifact_refs.push(log_path.display().to_string());

        let teardown_start = Instant::now();
        log.phase_timings.teardown_ms = duration_ms(teardown_start);
        log.duration_ms = duration_ms(overall_start);
        let _ = write_log(&log_path, &log);

        if let Some(payload) = panic_payload {
            std::panic::resume_unwind(payload);
        }
        if let Some(detail) = failure_detail {
            panic!("{detail}");
        }
    }
}

pub fn write_log(path: &Path, log: &TestLogV1) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| format!("log dir create failed: {err}"))?;
    }
    let payload =
        serde_json::to_string_pretty(log).map_err(|err| format!("log serialize failed: {err}"))?;
    fs::write(path, payload).map_err(|err| format!("log write failed: {err}"))
}

#[must_use]
pub fn capture_env() -> TestLogEnv {
    TestLogEnv {
        rust_version: rust_version(),
        os: std::env::consts::OS.to_owned(),
        cargo_target_dir: std::env::var("CARGO_TARGET_DIR")
            .unwrap_or_else(|_| "<default>".to_owned()),
        timestamp_unix_ms: now_unix_ms_u64(),
    }
}

pub fn fixture_id_from_json<T: Serialize>(fixture: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(fixture)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[must_use]
pub fn property_test_case_count() -> u32 {
    if let Ok(raw) = std::env::var("FWD_PROPTEST_CASES")
        && let Ok(parsed) = raw.parse::<u32>()
        && parsed > 0
    {
        return parsed;
    }

    if std::env::var_os("CI").is_some() {
        1024
    } else {
        256
    }
}

#[must_use]
pub fn capture_proptest_seed() -> Option<u64> {
    if let Ok(raw) = std::env::var("FWD_PROPTEST_SEED")
        && let Ok(seed) = raw.parse::<u64>()
    {
        return Some(seed);
    }

    if let Ok(raw) = std::env::var("PROPTEST_RNG_SEED")
        && let Ok(seed) = raw.parse::<u64>()
    {
        return Some(seed);
    }

    None
}

#[must_use]
pub fn test_id(module_path: &str, test_name: &str) -> String {
    format!("{module_path}::{test_name}")
}

fn duration_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return (*msg).to_owned();
    }
    "non-string panic payload".to_owned()
}

fn now_unix_ms_u64() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or(0)
}

fn rust_version() -> String {
    let output = Command::new("rustc").arg("--version").output();
    match output {
        Ok(result) if result.status.success() => {
            String::from_utf8_lossy(&result.stdout).trim().to_owned()
        }
        _ => "rustc <unknown>".to_owned(),
    }
}
