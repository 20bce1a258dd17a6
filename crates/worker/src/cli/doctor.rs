use std::time::Duration;

use va_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("voice-agent-worker doctor");
    println!("=========================\n");

    let mut all_passed = true;

    // 1. Config file
    check_config_file(config_path, &mut all_passed);

    // 2. Config validation
    check_config_validation(config, &mut all_passed);

    // 3. Room-server control-plane reachability
    check_control_plane(config, &mut all_passed).await;

    // 4. LLM providers
    check_llm_providers(config, &mut all_passed);

    // 5. Outbound dial trunk
    check_dial_trunk(config, &mut all_passed);

    // Summary
    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

async fn check_control_plane(config: &Config, all_passed: &mut bool) {
    let Some(url) = &config.server.url else {
        print_check("Room-server reachable", false, "server.url is not set".into());
        *all_passed = false;
        return;
    };

    let reachable = tokio::time::timeout(Duration::from_secs(5), tokio_tungstenite::connect_async(url))
        .await
        .is_ok_and(|r| r.is_ok());

    print_check(
        "Room-server reachable",
        reachable,
        if reachable {
            url.clone()
        } else {
            format!("{url} (unreachable)")
        },
    );

    if !reachable {
        *all_passed = false;
    }
}

fn check_llm_providers(config: &Config, all_passed: &mut bool) {
    let count = config.llm.providers.len();
    let ok = count > 0;

    print_check(
        "LLM providers configured",
        ok,
        if ok {
            format!("{count} provider(s)")
        } else {
            "none configured".into()
        },
    );

    if !ok {
        *all_passed = false;
    }
}

fn check_dial_trunk(config: &Config, all_passed: &mut bool) {
    let ok = config.dialer.outbound_trunk_id.is_some();

    print_check(
        "Outbound dial trunk configured",
        ok,
        match &config.dialer.outbound_trunk_id {
            Some(id) => id.clone(),
            None => "dialer.outbound_trunk_id is unset".into(),
        },
    );

    // A job can carry its own trunk id, so this is advisory rather than
    // fatal to the overall doctor verdict.
    let _ = (ok, all_passed);
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
