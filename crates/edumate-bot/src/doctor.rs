//! Environment readiness check.

use std::path::Path;

use edumate_attendance::{find_chromium, JsonFileRegistry, UserRegistry};

use crate::config::{self, Overrides};
use crate::transport::TelegramClient;
use crate::types::BotResult;

/// Check Chromium, the bot token, the registry file, and the screenshot
/// directory. Returns whether everything needed to serve is in place.
pub async fn run(overrides: &Overrides) -> BotResult<bool> {
    println!("Edumate Bot Doctor");
    println!("==================");
    println!();

    let mut ready = true;

    // Chromium
    let chromium = overrides
        .chromium
        .as_deref()
        .map(Path::new)
        .filter(|p| p.exists())
        .map(Path::to_path_buf)
        .or_else(find_chromium);
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => {
            ready = false;
            println!("[!!] Chromium NOT found. Install Chrome or set EDUMATE_CHROMIUM_PATH.");
        }
    }

    // Token
    match config::resolve_token(overrides.token.as_deref()) {
        Ok(token) => {
            let api_base = std::env::var(config::API_BASE_ENV)
                .unwrap_or_else(|_| config::DEFAULT_API_BASE.to_string());
            match TelegramClient::with_api_base(&token, &api_base)?.get_me().await {
                Ok(me) => println!(
                    "[OK] Bot token accepted: @{}",
                    me.username.unwrap_or_else(|| me.id.to_string())
                ),
                Err(e) => {
                    ready = false;
                    println!("[!!] Bot token check failed: {e}");
                }
            }
        }
        Err(e) => {
            ready = false;
            println!("[!!] {e}");
        }
    }

    // Registry
    let users_file = config::resolve_users_file(overrides.users_file.as_deref());
    match JsonFileRegistry::new(&users_file).load().await {
        Ok(users) => println!(
            "[OK] Registry {} ({} registered)",
            users_file.display(),
            users.len()
        ),
        Err(e) => {
            ready = false;
            println!("[!!] Registry {} unreadable: {e}", users_file.display());
        }
    }

    // Screenshot directory
    let shots = config::resolve_screenshot_dir(overrides.screenshot_dir.as_deref());
    match std::fs::create_dir_all(&shots) {
        Ok(()) => println!("[OK] Screenshot directory {}", shots.display()),
        Err(e) => {
            ready = false;
            println!("[!!] Screenshot directory {} not writable: {e}", shots.display());
        }
    }

    println!();
    if ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(ready)
}
