//! User-Friendly Error Formatting
//!
//! Turns an error chain into a boxed message with troubleshooting hints for
//! the failures an operator can actually fix.

use std::fmt::Write;

/// Format error for user consumption
///
/// Takes technical error and produces user-friendly message with
/// troubleshooting steps and context.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    // Header
    writeln!(&mut output).ok();
    writeln!(
        &mut output,
        "╔════════════════════════════════════════════════════════════╗"
    )
    .ok();
    writeln!(
        &mut output,
        "║                     ERROR                                  ║"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();
    writeln!(&mut output).ok();

    // Match against the whole chain, not just the outermost context
    let error_msg = format!("{:#}", error);

    if error_msg.contains("config") {
        format_config_error(&mut output);
    } else if error_msg.contains("No usable encoder") || error_msg.contains("Encoder") {
        format_encoder_error(&mut output);
    } else if error_msg.contains("Display") || error_msg.contains("display") {
        format_display_error(&mut output);
    } else {
        format_generic_error(&mut output, &error.to_string());
    }

    // Technical details
    writeln!(&mut output).ok();
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Technical Details:").ok();
    writeln!(&mut output).ok();
    writeln!(&mut output, "{}", error_msg).ok();
    writeln!(&mut output).ok();

    // Footer with help
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Need Help?").ok();
    writeln!(
        &mut output,
        "  - Run with --verbose for detailed logs: lamco-capture-sync -vvv"
    )
    .ok();
    writeln!(
        &mut output,
        "  - Report issues: https://github.com/lamco-admin/lamco-capture-sync/issues"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();

    output
}

fn format_config_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Problem with configuration file.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Configuration file not found").ok();
    writeln!(
        output,
        "     → Specify: lamco-capture-sync -c /path/to/config.toml"
    )
    .ok();
    writeln!(output, "     → Or run without -c to use built-in defaults").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Value out of range").ok();
    writeln!(output, "     → Session width and height must be even").ok();
    writeln!(output, "     → hevc_mode must be 0-3, qp 0-51").ok();
}

fn format_encoder_error(output: &mut String) {
    writeln!(output, "Encoder Error").ok();
    writeln!(output).ok();
    writeln!(output, "No encoder could serve the requested sessions.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Hardware encoder not available").ok();
    writeln!(output, "     → Use the software encoder: --encoder software").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Codec or HDR not supported by the encoder").ok();
    writeln!(output, "     → Set [session] video_format = \"h264\"").ok();
    writeln!(output, "     → Or disable dynamic_range").ok();
}

fn format_display_error(output: &mut String) {
    writeln!(output, "Display Capture Error").ok();
    writeln!(output).ok();
    writeln!(output, "Could not acquire the display to capture.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Display name does not exist").ok();
    writeln!(output, "     → Leave [capture] output_name empty for the first display").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Display busy or reinitializing").ok();
    writeln!(output, "     → Raise [capture] acquire_attempts or acquire_backoff_ms").ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Capture Error").ok();
    writeln!(output).ok();
    writeln!(output, "An error occurred while running the capture pipeline.").ok();
    writeln!(output).ok();
    writeln!(output, "Error: {}", error).ok();
}
