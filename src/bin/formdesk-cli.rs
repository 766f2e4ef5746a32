use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "formdesk-cli")]
#[command(about = "Operator CLI for the formdesk admin API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "FORMDESK_URL", default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "FORMDESK_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server status and store counts
    Status,
    /// List users with their subscriptions
    Users,
    /// List every plan, archived ones included
    Plans,
    /// List manual payments
    Payments {
        /// pending, approved, rejected or cancelled
        #[arg(long)]
        status: Option<String>,
    },
    /// Approve a pending manual payment
    Approve {
        payment_id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Reject a pending manual payment
    Reject {
        payment_id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show recent audit entries
    Audit {
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Revert lapsed manual subscriptions now
    Sweep,
    /// Put a user on a plan immediately
    SetPlan {
        user_id: String,
        plan_id: String,
        /// Form ids to keep active when the plan would lock forms
        #[arg(long, value_delimiter = ',')]
        keep: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Users => client.get(format!("{base}/admin/users")),
        Commands::Plans => client.get(format!("{base}/admin/plans")),
        Commands::Payments { status } => {
            let mut req = client.get(format!("{base}/admin/payments"));
            if let Some(status) = status {
                req = req.query(&[("status", status)]);
            }
            req
        }
        Commands::Approve { payment_id, note } => client
            .post(format!("{base}/admin/payments/{payment_id}/approve"))
            .json(&json!({ "note": note })),
        Commands::Reject { payment_id, note } => client
            .post(format!("{base}/admin/payments/{payment_id}/reject"))
            .json(&json!({ "note": note })),
        Commands::Audit { user_id, limit } => {
            let mut req = client
                .get(format!("{base}/admin/audit"))
                .query(&[("limit", limit.to_string())]);
            if let Some(user_id) = user_id {
                req = req.query(&[("user_id", user_id)]);
            }
            req
        }
        Commands::Sweep => client.post(format!("{base}/admin/subscriptions/sweep")),
        Commands::SetPlan {
            user_id,
            plan_id,
            keep,
        } => {
            let keep = (!keep.is_empty()).then_some(keep);
            client
                .post(format!("{base}/admin/users/{user_id}/plan"))
                .json(&json!({ "plan_id": plan_id, "keep_form_ids": keep }))
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(());
    }
    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
