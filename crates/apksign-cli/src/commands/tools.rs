//! `apksign tools`: show which signing tools will be used.

use anyhow::Result;
use console::style;

use crate::config::{SigningFlags, describe_tool, load_config_or_warn, resolve_config, tool_config};

pub fn handle_tools_command(profile: Option<&str>) -> Result<()> {
    let resolved = resolve_config(profile, &SigningFlags::default(), load_config_or_warn())?;
    let tools = tool_config(&resolved, false)?;

    for (name, tool) in [
        ("apksigner", &tools.apksigner),
        ("zipalign", &tools.zipalign),
        ("keytool", &tools.keytool),
    ] {
        let mark = if tool.is_available() {
            style("✓").green()
        } else {
            style("x").red()
        };
        println!("{} {:<10} {}", mark, name, describe_tool(tool));
    }

    println!();
    println!("Timeout:      {} s per tool run", tools.timeout_secs);
    println!(
        "Alignment:    {}",
        if tools.native_align { "in-process" } else { "zipalign" }
    );

    Ok(())
}
