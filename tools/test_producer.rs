//! Test Customer Record Producer
//!
//! Generates and publishes random customer records to NATS for pipeline testing.

use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

const FIRST_NAMES: [&str; 8] = ["Ana", "Luis", "María", "Carlos", "Lucía", "Jorge", "Sofía", "Diego"];
const LAST_NAMES: [&str; 6] = ["García", "Ruiz", "López", "Martín", "Sánchez", "Díaz"];
const ZODIAC: [&str; 12] = [
    "aries", "taurus", "gemini", "cancer", "leo", "virgo", "libra", "scorpio", "sagittarius",
    "capricorn", "aquarius", "pisces",
];

/// Customer record generator for testing
struct CustomerGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
}

impl CustomerGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    fn flag(&mut self, p: f64) -> u8 {
        u8::from(self.rng.gen_bool(p))
    }

    fn identity(&mut self) -> (String, String, String) {
        self.counter += 1;
        let first = self.random_choice(&FIRST_NAMES).to_string();
        let last = self.random_choice(&LAST_NAMES).to_string();
        let email = format!("customer{:06}@example.com", self.counter);
        (first, last, email)
    }

    /// Active, digitally engaged customer
    fn generate_engaged(&mut self) -> Value {
        let (first, last, email) = self.identity();
        json!({
            "Name": first,
            "Surname": last,
            "email": email,
            "age": self.rng.gen_range(25..60),
            "housing": self.random_choice(&["o", "r", "mortgage"]),
            "payment_type": self.random_choice(&["credit_card", "debit_card", "bank_transfer"]),
            "zodiac_sign": self.random_choice(&ZODIAC),
            "credit_score": self.rng.gen_range(620..820),
            "deposits": self.rng.gen_range(5..40),
            "withdrawal": self.rng.gen_range(0..10),
            "purchases": self.rng.gen_range(10..80),
            "purchases_partners": self.rng.gen_range(5..60),
            "cc_taken": self.flag(0.5),
            "cc_recommended": self.flag(0.6),
            "cc_liked": self.flag(0.3),
            "cc_disliked": 0,
            "cc_application_begin": self.flag(0.4),
            "app_downloaded": 1,
            "web_user": self.flag(0.6),
            "app_web_user": self.flag(0.4),
            "ios_user": self.flag(0.5),
            "android_user": self.flag(0.5),
            "registered_phones": self.rng.gen_range(1..3),
            "waiting_4_loan": 0,
            "cancelled_loan": 0,
            "received_loan": self.flag(0.1),
            "rejected_loan": 0,
            "left_for_one_month": 0,
            "left_for_two_month_plus": 0,
            "rewards_earned": self.rng.gen_range(50..900),
            "reward_rate": self.rng.gen_range(0.5..4.0),
            "is_referred": self.flag(0.3),
        })
    }

    /// Inactive customer with churn signals
    fn generate_at_risk(&mut self) -> Value {
        let (first, last, email) = self.identity();
        json!({
            "Name": first,
            "Surname": last,
            "email": email,
            "age": self.rng.gen_range(18..70),
            "housing": self.random_choice(&["r", "na", ""]),
            "payment_type": self.random_choice(&["debit_card", "cash"]),
            "zodiac_sign": self.random_choice(&ZODIAC),
            "credit_score": self.rng.gen_range(420..640),
            "deposits": self.rng.gen_range(0..3),
            "withdrawal": self.rng.gen_range(0..4),
            "purchases": self.rng.gen_range(0..8),
            "purchases_partners": self.rng.gen_range(0..5),
            "cc_taken": self.flag(0.2),
            "cc_recommended": self.flag(0.2),
            "cc_liked": 0,
            "cc_disliked": self.flag(0.4),
            "cc_application_begin": 0,
            "app_downloaded": self.flag(0.3),
            "web_user": self.flag(0.3),
            "app_web_user": 0,
            "ios_user": self.flag(0.2),
            "android_user": self.flag(0.2),
            "registered_phones": self.rng.gen_range(0..2),
            "waiting_4_loan": self.flag(0.2),
            "cancelled_loan": self.flag(0.3),
            "received_loan": 0,
            "rejected_loan": self.flag(0.3),
            "left_for_one_month": self.flag(0.5),
            "left_for_two_month_plus": self.flag(0.4),
            "rewards_earned": self.rng.gen_range(0..60),
            "reward_rate": self.rng.gen_range(0.0..1.0),
            "is_referred": 0,
        })
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Customer Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("customers.records");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let at_risk_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.3);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        at_risk_rate = at_risk_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, at_risk_rate, delay_ms).await;
        }
    };

    let mut generator = CustomerGenerator::new();
    let mut rng = rand::thread_rng();

    info!("Starting to publish {} customer records...", count);

    let mut engaged_count = 0;
    let mut at_risk_count = 0;

    for i in 0..count {
        let record = if rng.gen_bool(at_risk_rate) {
            at_risk_count += 1;
            generator.generate_at_risk()
        } else {
            engaged_count += 1;
            generator.generate_engaged()
        };

        let payload = serde_json::to_vec(&record)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} records ({} engaged, {} at risk)",
                i + 1,
                count,
                engaged_count,
                at_risk_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    // Make sure buffered messages reach the server before exiting
    client.flush().await?;

    info!(
        "Completed! Published {} records ({} engaged, {} at risk)",
        count, engaged_count, at_risk_count
    );

    Ok(())
}

async fn run_dry_mode(count: u64, at_risk_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = CustomerGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let record = if rng.gen_bool(at_risk_rate) {
            generator.generate_at_risk()
        } else {
            generator.generate_engaged()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample record {}:\n{}", i + 1, serde_json::to_string_pretty(&record)?);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
