//! `turnledger doctor` — Diagnose configuration and provider reachability.

use turnledger_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 turnledger doctor");
    println!("====================\n");

    let mut issues = 0;

    // Check config
    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ℹ️  No config file — using built-in defaults");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!();
            println!("  ⚠️  1 issue found. Fix the config before continuing.");
            return Ok(());
        }
    };

    // Check the ledger settings build a ledger
    match config.ledger.build() {
        Ok(ledger) => println!(
            "  ✅ Conversation window: {} turns{}",
            ledger.max_turns(),
            if ledger.system().is_some() { ", system prompt set" } else { "" }
        ),
        Err(e) => {
            println!("  ❌ Ledger settings rejected: {e}");
            issues += 1;
        }
    }

    // Check API key
    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else if config.default_provider == "ollama" {
        println!("  ✅ No API key needed for ollama");
    } else {
        println!("  ⚠️  No API key configured — set GROQ_API_KEY or add api_key to config.toml");
        issues += 1;
    }

    // Probe the provider
    let provider = turnledger_providers::build_from_config(&config);
    match provider.health_check().await {
        Ok(true) => println!("  ✅ Provider '{}' reachable", provider.name()),
        Ok(false) => {
            println!("  ⚠️  Provider '{}' answered but rejected the request", provider.name());
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Provider '{}' unreachable: {e}", provider.name());
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
