//! Reply text formatting.
//!
//! All user-facing replies are fenced code blocks; these helpers keep the
//! texture consistent across handlers.

use crate::instance::InstanceStatus;
use crate::server::ServerStatus;

/// Help text sent for anything that is not a recognized command.
pub const HELP_TEXT: &str =
    "```start:  Start Instance\nstop:   Stop Instance\nstatus: Get Instance Status```";

/// Format the instance block of a status reply.
pub fn instance_status_text(status: &InstanceStatus) -> String {
    format!("```Name:    {}\nStatus:  {}```", status.name, status.code)
}

/// Format the server block of a status reply.
pub fn server_status_text(status: &ServerStatus) -> String {
    if !status.is_online {
        return "```Server:  offline```".to_string();
    }
    format!(
        "```Server:  online\nGame:    {}\nPlayers: {}/{}\nMap:     {}```",
        status.game_name, status.player_count, status.max_player_count, status.map
    )
}

/// Format a failure block with its error detail.
pub fn failure_text(title: &str, detail: &impl std::fmt::Display) -> String {
    format!("```{}``````{}```", title, detail)
}
