//! Command-line surface of the `dealroom` binary.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};

use dealroom_client::{ClientConfig, SlotId};
use dealroom_media::PagePlacement;
use dealroom_shared::{ThreadId, UserId};

#[derive(Debug, Parser)]
#[command(name = "dealroom")]
#[command(about = "Deal-room client: threads, contracts and co-signing")]
pub struct Cli {
    /// Backend base URL
    #[arg(long, global = true, env = "DEALROOM_API_URL")]
    pub api_url: Option<String>,

    /// Signed-in user id
    #[arg(long, global = true, env = "DEALROOM_USER_ID")]
    pub user: Option<String>,

    /// Bearer token for the backend session
    #[arg(long, global = true, env = "DEALROOM_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Fold flags (or their environment fallbacks) into the configuration.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.api_url {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            config.user_id = Some(UserId::from(user));
        }
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            config.access_token = Some(token.to_string());
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show a thread: messages, contract slots and sale status
    Show {
        thread: ThreadId,

        /// Counterparty to recreate the thread with if it no longer exists
        #[arg(long)]
        with: Option<UserId>,
    },

    /// Send a message
    Send {
        thread: ThreadId,

        #[arg(default_value = "")]
        text: String,

        /// PNG or JPEG attachment
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Upload a PDF into a contract slot (nda, loi, dd, transfer, handover, or
    /// custom:<id> of a stored custom document)
    Upload {
        thread: ThreadId,
        slot: SlotId,
        file: PathBuf,
    },

    /// Upload a PDF into a new custom slot; prints the slot to use afterwards
    AddCustom { thread: ThreadId, file: PathBuf },

    /// Sign the document in a contract slot
    Sign {
        thread: ThreadId,
        slot: SlotId,

        /// Pages to sign; required for multi-page PDFs
        #[arg(long, value_enum)]
        placement: Option<Placement>,

        /// Stroke as space-separated `x,y` points on the 600x200 canvas;
        /// repeat for several strokes
        #[arg(long = "stroke")]
        strokes: Vec<Stroke>,
    },

    /// Open a sale request on the thread
    Sell {
        thread: ThreadId,

        #[arg(long)]
        post: Option<String>,

        #[arg(long)]
        price: i64,

        #[arg(long)]
        phone: Option<String>,
    },

    /// Follow a thread's events and sale requests until interrupted
    Watch { thread: ThreadId },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Placement {
    Last,
    All,
}

impl From<Placement> for PagePlacement {
    fn from(placement: Placement) -> Self {
        match placement {
            Placement::Last => PagePlacement::LastPage,
            Placement::All => PagePlacement::AllPages,
        }
    }
}

/// One pen stroke, in canvas pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke(pub Vec<(f32, f32)>);

impl Stroke {
    /// Used when no stroke is given on the command line.
    pub fn scribble() -> Vec<Stroke> {
        vec![Stroke(vec![
            (40.0, 140.0),
            (120.0, 60.0),
            (200.0, 150.0),
            (280.0, 70.0),
            (360.0, 140.0),
            (520.0, 110.0),
        ])]
    }
}

impl FromStr for Stroke {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let points = s
            .split_whitespace()
            .map(|point| {
                let (x, y) = point
                    .split_once(',')
                    .ok_or_else(|| format!("expected x,y but got {point:?}"))?;
                let x = x.parse::<f32>().map_err(|e| format!("bad x in {point:?}: {e}"))?;
                let y = y.parse::<f32>().map_err(|e| format!("bad y in {point:?}: {e}"))?;
                Ok((x, y))
            })
            .collect::<Result<Vec<_>, String>>()?;

        if points.is_empty() {
            return Err("a stroke needs at least one point".to_string());
        }
        Ok(Stroke(points))
    }
}
