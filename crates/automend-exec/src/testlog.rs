//! Failing-test-id extraction from runner output.
//!
//! The engine compares failing-identifier sets, so the raw log has to be
//! reduced to identifiers. Recognized formats: `cargo test`, pytest, Python
//! unittest, and `go test`. When nothing matches but the command failed,
//! a synthetic identifier derived from the exit code keeps set comparison
//! well-defined (and deterministic failures still register as stable).

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

struct Extractor {
    cargo: Regex,
    pytest: Regex,
    unittest: Regex,
    gotest: Regex,
}

fn extractor() -> &'static Extractor {
    static EXTRACTOR: OnceLock<Extractor> = OnceLock::new();
    EXTRACTOR.get_or_init(|| Extractor {
        // test module::case ... FAILED
        cargo: Regex::new(r"(?m)^test (\S+) \.\.\. FAILED$").expect("cargo regex"),
        // FAILED tests/test_x.py::test_y - AssertionError: ...
        pytest: Regex::new(r"(?m)^FAILED (\S+)").expect("pytest regex"),
        // FAIL: test_x (module.TestCase)
        unittest: Regex::new(r"(?m)^FAIL: (\S+)").expect("unittest regex"),
        // --- FAIL: TestName (0.01s)
        gotest: Regex::new(r"(?m)^--- FAIL: (\S+)").expect("go regex"),
    })
}

/// Extract failing test identifiers from combined runner output.
pub fn extract_failing_tests(output: &str) -> BTreeSet<String> {
    let ex = extractor();
    let mut failing = BTreeSet::new();

    for re in [&ex.cargo, &ex.pytest, &ex.unittest, &ex.gotest] {
        for caps in re.captures_iter(output) {
            if let Some(id) = caps.get(1) {
                failing.insert(id.as_str().to_string());
            }
        }
    }

    failing
}

/// Identifier set for a completed run: parsed failures, or a synthetic
/// identifier when the run failed without a recognizable report.
pub fn failing_set(output: &str, exit_code: i32) -> BTreeSet<String> {
    if exit_code == 0 {
        return BTreeSet::new();
    }

    let parsed = extract_failing_tests(output);
    if parsed.is_empty() {
        let mut synthetic = BTreeSet::new();
        synthetic.insert(format!("unparsed::exit_{exit_code}"));
        synthetic
    } else {
        parsed
    }
}
