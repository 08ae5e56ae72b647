use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;

use forja_payments::{
    config,
    flow::{canonical_string, FlowClient, FlowParams, FlowSigner, PaymentGateway},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sign(args) => handle_sign(args, cli.json)?,
        Commands::SimulateWebhook(args) => handle_simulate_webhook(args, cli.json).await?,
        Commands::Status(args) => handle_status(args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "flow-cli",
    about = "Sign Flow.cl payloads and exercise the payment webhook",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the Flow signature for a parameter set
    Sign(SignArgs),
    /// Sign and POST a Flow confirmation to a running service
    SimulateWebhook(SimulateWebhookArgs),
    /// Ask Flow for the status of a payment token
    Status(StatusArgs),
}

#[derive(Args)]
struct SecretArgs {
    #[arg(
        long,
        env = "APP__FLOW_SECRET_KEY",
        hide_env_values = true,
        help = "Flow secret key used for HMAC signing"
    )]
    secret: String,
}

#[derive(Args)]
struct SignArgs {
    #[command(flatten)]
    secret: SecretArgs,
    #[arg(
        long = "param",
        short = 'p',
        value_parser = parse_key_value,
        help = "Parameter as key=value; repeat for each field"
    )]
    params: Vec<(String, String)>,
}

#[derive(Args)]
struct SimulateWebhookArgs {
    #[command(flatten)]
    secret: SecretArgs,
    #[arg(long, default_value = "http://localhost:8080/flow-webhook")]
    url: String,
    #[arg(long, help = "Commerce order id")]
    order: i64,
    #[arg(long, help = "Payment token stored on the order")]
    token: String,
    #[arg(long, default_value_t = 2, help = "Flow status: 1 pending, 2 paid, 3 rejected, 4 cancelled")]
    status: i64,
    #[arg(long, help = "Paid amount in whole CLP")]
    amount: Option<i64>,
    #[arg(long, help = "Flow order number")]
    flow_order: Option<i64>,
    #[arg(long, help = "Payment method code")]
    payment_method: Option<i64>,
}

#[derive(Args)]
struct StatusArgs {
    #[arg(long, help = "Payment token to look up")]
    token: String,
}

#[derive(Serialize)]
struct SignOutput {
    canonical: String,
    signature: String,
}

#[derive(Serialize)]
struct WebhookOutput {
    status: u16,
    body: String,
    params: FlowParams,
}

fn parse_key_value(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got {:?}", raw))?;
    if key.is_empty() {
        return Err(anyhow!("empty key in {:?}", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_sign(args: SignArgs, json: bool) -> Result<()> {
    let signer = FlowSigner::new(&args.secret.secret).context("invalid Flow secret")?;
    let params: FlowParams = args.params.into_iter().collect();
    let output = SignOutput {
        canonical: canonical_string(&params),
        signature: signer.sign(&params),
    };

    if json {
        print_json(&output)?;
    } else {
        println!("{}", output.signature);
    }
    Ok(())
}

async fn handle_simulate_webhook(args: SimulateWebhookArgs, json: bool) -> Result<()> {
    let signer = FlowSigner::new(&args.secret.secret).context("invalid Flow secret")?;

    let mut params = FlowParams::new();
    params.insert("commerceOrder".into(), args.order.to_string());
    params.insert("token".into(), args.token);
    params.insert("status".into(), args.status.to_string());
    if let Some(amount) = args.amount {
        params.insert("amount".into(), amount.to_string());
    }
    if let Some(flow_order) = args.flow_order {
        params.insert("flowOrder".into(), flow_order.to_string());
    }
    if let Some(method) = args.payment_method {
        params.insert("paymentMethod".into(), method.to_string());
    }
    let params = signer.signed(params);

    let response = reqwest::Client::new()
        .post(&args.url)
        .form(&params)
        .send()
        .await
        .with_context(|| format!("failed to POST webhook to {}", args.url))?;
    let output = WebhookOutput {
        status: response.status().as_u16(),
        body: response.text().await.unwrap_or_default(),
        params,
    };

    if json {
        print_json(&output)?;
    } else {
        println!("{} {}", output.status, output.body);
    }
    Ok(())
}

async fn handle_status(args: StatusArgs, json: bool) -> Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    let client = FlowClient::from_app_config(&cfg).context("failed to build Flow client")?;
    let status = client
        .get_status(&args.token)
        .await
        .context("Flow status lookup failed")?;

    if json {
        print_json(&status)?;
    } else {
        println!(
            "order {} • status {} • amount {} • method {}",
            status
                .commerce_order
                .map(|o| o.to_string())
                .unwrap_or_else(|| "?".into()),
            status.status.map(|s| s.to_string()).unwrap_or_else(|| "?".into()),
            status.amount.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
            forja_payments::flow::payment_method_label(status.method_code()),
        );
    }
    Ok(())
}
