//! Markdown rendering of a harness run.

use super::TestSuite;
use crate::utils::errors::Result;
use std::fmt::Write;
use std::path::{Path, PathBuf};

pub const REPORT_DIR: &str = "backup-tests";

pub fn render(suite: &TestSuite) -> String {
    let success_rate = if suite.total_tests == 0 {
        0.0
    } else {
        suite.passed as f64 / suite.total_tests as f64 * 100.0
    };

    let mut out = String::new();
    let _ = writeln!(out, "# Backup & Restore Test Report\n");
    let _ = writeln!(out, "**Date**: {}  ", suite.run_date.to_rfc3339());
    let _ = writeln!(out, "**Duration**: {:.2}s  ", suite.duration_ms as f64 / 1000.0);
    let _ = writeln!(
        out,
        "**Tests**: {} total, {} passed, {} failed  ",
        suite.total_tests, suite.passed, suite.failed
    );
    let _ = writeln!(out, "**Success Rate**: {:.2}%\n", success_rate);
    let _ = writeln!(out, "---\n\n## Test Results");

    for (idx, test) in suite.tests.iter().enumerate() {
        let _ = writeln!(out, "\n### {}. {}\n", idx + 1, test.test_name);
        let _ = writeln!(
            out,
            "**Status**: {}  ",
            if test.passed { "PASSED" } else { "FAILED" }
        );
        let _ = writeln!(out, "**Duration**: {:.2}s", test.duration_ms as f64 / 1000.0);

        if !test.errors.is_empty() {
            let _ = writeln!(out, "\n**Errors**:");
            for e in &test.errors {
                let _ = writeln!(out, "- {}", e);
            }
        }
        if !test.warnings.is_empty() {
            let _ = writeln!(out, "\n**Warnings**:");
            for w in &test.warnings {
                let _ = writeln!(out, "- {}", w);
            }
        }

        let details = &test.details;
        if let Some(id) = &details.backup_id {
            let _ = writeln!(out, "\n**Backup ID**: {}", id);
        }
        if let Some(items) = details.restored_items {
            let _ = writeln!(out, "**Restored Items**: {}", items);
        }
        if let Some(ok) = details.data_integrity {
            let _ = writeln!(
                out,
                "**Data Integrity**: {}",
                if ok { "Valid" } else { "Invalid" }
            );
        }
        if let Some(ratio) = details
            .performance_metrics
            .as_ref()
            .and_then(|m| m.compression_ratio)
        {
            let _ = writeln!(out, "\n**Performance**:\n- Compression Ratio: {:.2}%", ratio * 100.0);
        }
        let _ = writeln!(out, "\n---");
    }

    let _ = writeln!(out, "\n## Summary\n");
    if suite.failed == 0 {
        let _ = writeln!(out, "All tests passed successfully!\n");
        let _ = writeln!(out, "**Next Steps**:\n- Continue regular testing schedule\n- Monitor backup system health");
    } else {
        let _ = writeln!(out, "{} test(s) failed. Please review errors above.\n", suite.failed);
        let _ = writeln!(out, "**Next Steps**:\n- Investigate and fix failing tests\n- Re-run test suite");
    }
    out
}

/// Write the report to `{reports_path}/backup-tests/test-{timestamp}.md`
pub async fn write_report(suite: &TestSuite, reports_path: &Path) -> Result<PathBuf> {
    let dir = reports_path.join(REPORT_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let file = dir.join(format!(
        "test-{}.md",
        suite.run_date.format("%Y%m%dT%H%M%S%.3fZ")
    ));
    tokio::fs::write(&file, render(suite)).await?;
    tracing::info!(report = %file.display(), "Test report generated");
    Ok(file)
}
