//! User-facing message texts and outcome rendering.

use crate::types::AttendanceReport;

pub const WELCOME_NEW: &str = "Welcome to the Edumate Attendance Bot!\n\
    I see you are new here. Please enter your *Edumate Email ID* to get started.";

pub const NOT_REGISTERED: &str = "You are not registered. Please use /start to register.";

pub const PASSWORD_PROMPT: &str = "Please enter your *Edumate Password*.\n\
    _Note: Your password is NOT stored and is only used once to fetch data._";

pub const INVALID_EMAIL: &str = "That doesn't look like a valid email. Please try again.";

pub const FETCHING: &str = "Fetching data... Please wait.";

pub const MISSING_REGISTRATION: &str = "Something went wrong. Please /start again.";

pub const TRY_AGAIN: &str = "Something went wrong. Please try again later.";

pub const NOT_UNDERSTOOD: &str = "I didn't understand that. Try /attendance or /help.";

pub const HELP: &str = "Commands:\n\
    /start - register your Edumate email\n\
    /attendance - fetch your attendance and OD percentages\n\
    /help - show this message\n\n\
    Your password is asked for every time and is never stored.";

pub fn welcome_back(email: &str) -> String {
    format!(
        "Welcome back! Your registered email is {email}.\n\
         Use /attendance to fetch your data."
    )
}

pub fn email_saved(email: &str) -> String {
    format!(
        "Awesome! Saved {}.\n\
         Now, let's fetch your attendance. Please enter your *Password*.",
        escape_markdown(email)
    )
}

/// Three-line summary of a successful extraction.
pub fn report_summary(report: &AttendanceReport) -> String {
    format!(
        "*Student:* {}\n*Attendance:* {}\n*OD Percentage:* {}",
        escape_markdown(&report.email),
        escape_markdown(&report.attendance.to_string()),
        escape_markdown(&report.od.to_string()),
    )
}

pub fn soft_failure(message: &str, with_screenshot: bool) -> String {
    if with_screenshot {
        format!("Error: {message}\nSee attached screenshot for details.")
    } else {
        format!("Error: {message}")
    }
}

pub fn hard_failure(cause: &str) -> String {
    format!("An error occurred: {cause}")
}

/// Escape the characters that carry meaning in legacy chat Markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
