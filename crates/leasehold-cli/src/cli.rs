use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "leasehold",
    about = "Leasehold: capacity-limited, expiring checkouts of protected resources",
    version
)]
pub struct Cli {
    /// Path to leasehold.toml (default: ./leasehold.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Store root directory (overrides [store] root)
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Evaluate at this RFC 3339 instant instead of the system clock
    #[arg(long, global = true)]
    pub now: Option<String>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store the checkout policy declared in a page source
    Declare {
        /// Resource the policy applies to
        resource: String,

        /// Source text containing a {{#checkout:...}} block or a bare parameter list
        #[arg(long, conflicts_with = "source_file", required_unless_present = "source_file")]
        source: Option<String>,

        /// Read the source text from a file
        #[arg(long)]
        source_file: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the checkout policy of a resource
    Undeclare {
        /// Resource whose policy is removed
        resource: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a resource out for a holder
    Checkout {
        /// Resource to check out
        resource: String,

        /// Holder identity
        #[arg(long)]
        holder: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Return a checked-out resource early
    Return {
        /// Resource to return
        resource: String,

        /// Holder identity
        #[arg(long)]
        holder: String,

        /// Sweep the resource right after returning
        #[arg(long)]
        sweep: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Revoke every expired checkout
    Sweep {
        /// Only sweep this resource
        #[arg(long)]
        resource: Option<String>,

        /// Keep sweeping on an interval until interrupted
        #[arg(long)]
        watch: bool,

        /// Seconds between sweeps in watch mode (overrides [sweep] interval_seconds)
        #[arg(long, requires = "watch", value_parser = clap::value_parser!(u64).range(1..))]
        interval_seconds: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what a holder (or anyone) may do with a resource now
    Status {
        /// Resource to inspect
        resource: String,

        /// Holder identity; anonymous when omitted
        #[arg(long)]
        holder: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List current holders of a resource with their expiries
    Holders {
        /// Resource to inspect
        resource: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
