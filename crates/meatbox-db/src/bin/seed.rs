//! # Seed Data Generator
//!
//! Populates the database with a demo box and purchases for development.
//!
//! ## Usage
//! ```bash
//! # One prepaid box with 4 purchases (default)
//! cargo run -p meatbox-db --bin seed
//!
//! # Custom purchase count and database path
//! cargo run -p meatbox-db --bin seed -- --purchases 8 --db ./data/meatbox.db
//! ```
//!
//! ## Generated Data
//! - One prepaid box in `waiting_purchases`, sized so the purchases fill
//!   it completely
//! - N purchases of 1-5 kg each, all paid except the last, so the box is
//!   one payment away from automatic closure
//! - `remaining_kg` recomputed from the purchase set

use chrono::{Duration, Utc};
use std::env;
use tracing_subscriber::EnvFilter;

use meatbox_core::closure::remaining_kg;
use meatbox_core::validation::validate_new_box;
use meatbox_core::{
    DispatchSteps, MeatBox, NewBox, OrderStatus, PaymentStatus, PaymentType, Purchase,
};
use meatbox_db::{generate_box_id, generate_purchase_id, Database, DbConfig};

const BUYERS: &[&str] = &[
    "ana.souza",
    "bruno.lima",
    "carla.mendes",
    "diego.rocha",
    "elisa.prado",
    "felipe.nunes",
    "gabriela.reis",
    "heitor.campos",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,meatbox=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut purchase_count: usize = 4;
    let mut db_path = String::from("./meatbox_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--purchases" | "-p" => {
                if i + 1 < args.len() {
                    purchase_count = args[i + 1].parse().unwrap_or(4);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Meatbox Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --purchases <N>  Number of purchases to generate (default: 4)");
                println!("  -d, --db <PATH>      Database file path (default: ./meatbox_dev.db)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let purchase_count = purchase_count.max(1);

    println!("Meatbox Seed Data Generator");
    println!("===========================");
    println!("Database:  {}", db_path);
    println!("Purchases: {}", purchase_count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database, migrations applied");

    let sizes: Vec<i64> = (0..purchase_count).map(|n| 1 + (n as i64 * 3) % 5).collect();
    let total_kg: i64 = sizes.iter().sum();

    let input = NewBox {
        name: "Picanha Angus".to_string(),
        brand: "Frigorífico Demo".to_string(),
        price_per_kg_cents: 8990,
        cost_per_kg_cents: 6200,
        total_kg,
        min_kg_per_person: 1,
        payment_type: PaymentType::Prepaid,
    };
    validate_new_box(&input)?;
    let meat_box = db
        .boxes()
        .insert(&MeatBox::from_new(generate_box_id(), &input, Utc::now()))
        .await?;
    println!("✓ Box {} ({} kg)", meat_box.id, total_kg);

    let start = Utc::now();
    let mut inserted = Vec::with_capacity(purchase_count);
    for (n, kg) in sizes.iter().enumerate() {
        let created_at = start + Duration::milliseconds(n as i64);
        let paid = n + 1 < purchase_count;
        let purchase = Purchase {
            id: generate_purchase_id(),
            order_number: Purchase::order_number_for(created_at.timestamp_millis()),
            box_id: meat_box.id.clone(),
            user_id: BUYERS[n % BUYERS.len()].to_string(),
            kg_purchased: *kg,
            total_amount_cents: meat_box.price_per_kg().per_kg(*kg).cents(),
            status: if paid {
                OrderStatus::WaitingBoxClosure
            } else {
                OrderStatus::WaitingPayment
            },
            payment_status: if paid {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Pending
            },
            payment_link: (!paid).then(|| format!("https://pay.example/checkout/{n}")),
            payment_expires_at: (!paid).then(|| created_at + Duration::hours(24)),
            dispatch: DispatchSteps::default(),
            created_at,
            updated_at: created_at,
            version: 0,
        };

        match db.purchases().insert(&purchase).await {
            Ok(p) => {
                println!("  {} {} kg ({})", p.order_number, p.kg_purchased, p.status);
                inserted.push(p);
            }
            Err(e) => eprintln!("Failed to insert purchase {}: {}", purchase.order_number, e),
        }
    }

    let remaining = remaining_kg(meat_box.total_kg, &inserted);
    db.boxes().set_remaining_kg(&meat_box.id, remaining).await?;

    println!();
    println!("✓ Seeded {} purchases, {} kg remaining", inserted.len(), remaining);
    println!("  Record the last payment to trigger automatic closure.");

    Ok(())
}
