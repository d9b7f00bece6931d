//! Seed script for the inventory API store
//!
//! Populates the sled database with sample rows:
//! - Products and users for the list endpoints
//! - Sales / purchase / expense summaries for the dashboard
//! - Expense-by-category rows for `/expenses`
//!
//! Run: cargo run --bin load_data
//! Reset the admin account instead:
//!   cargo run --bin load_data -- --reset-admin --name Admin --email a@x.com --password secret

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::Parser;
use uuid::Uuid;

use inventory_api::auth::hash_password;
use inventory_api::models::{
    AdminUser, ExpenseByCategorySummary, ExpenseSummary, Product, PurchaseSummary, SalesSummary,
    User,
};
use inventory_api::storage::Storage;

#[derive(Parser)]
#[command(name = "load_data", about = "Seed the inventory database")]
struct Args {
    #[arg(long, env = "DATABASE_URL", default_value = "inventory_data")]
    database: String,

    /// Delete every admin user and create a single admin with access.
    #[arg(long, requires_all = ["name", "email", "password"])]
    reset_admin: bool,

    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,

    #[arg(long, env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    bcrypt_cost: u32,

    /// Days of dashboard history to generate.
    #[arg(long, default_value_t = 10)]
    days: i64,
}

const PRODUCTS: [(&str, f64, f64, i64); 12] = [
    ("Ergonomic Office Chair", 189.99, 4.6, 42),
    ("Standing Desk", 349.00, 4.4, 18),
    ("Wireless Keyboard", 59.50, 4.1, 230),
    ("USB-C Dock", 129.00, 3.9, 77),
    ("Noise Cancelling Headphones", 249.99, 4.7, 64),
    ("27\" Monitor", 299.00, 4.5, 51),
    ("Laptop Stand", 39.99, 4.2, 310),
    ("Desk Lamp", 24.95, 3.8, 145),
    ("Webcam 1080p", 69.00, 4.0, 98),
    ("Cable Organizer", 12.50, 3.6, 520),
    ("Whiteboard", 89.00, 4.3, 23),
    ("Paper Shredder", 119.00, 3.7, 11),
];

const USERS: [(&str, &str); 5] = [
    ("Carlos Alvarez", "carlos@example.com"),
    ("Mei Tanaka", "mei@example.com"),
    ("Priya Raman", "priya@example.com"),
    ("Jonas Berg", "jonas@example.com"),
    ("Amara Okafor", "amara@example.com"),
];

const CATEGORIES: [&str; 3] = ["Office", "Professional", "Salaries"];

fn reset_admin(storage: &Storage, args: Args) -> anyhow::Result<()> {
    let (Some(name), Some(email), Some(password)) = (args.name, args.email, args.password) else {
        anyhow::bail!("--reset-admin needs --name, --email and --password");
    };

    let removed = storage.clear_admins()?;
    let admin = storage.create_admin(AdminUser {
        admin_user_id: Uuid::new_v4().to_string(),
        name,
        email,
        password: hash_password(&password, args.bcrypt_cost)?,
        has_access: true,
        price_id: None,
    })?;
    println!(
        "✅ Removed {removed} admin user(s); created {} <{}> with access",
        admin.admin_user_id, admin.email
    );
    Ok(())
}

fn seed(storage: &Storage, days: i64) -> anyhow::Result<()> {
    for (i, (name, price, rating, stock_quantity)) in PRODUCTS.iter().enumerate() {
        storage.insert_product(&Product {
            product_id: format!("product-{:02}", i + 1),
            name: name.to_string(),
            price: *price,
            rating: Some(*rating),
            stock_quantity: *stock_quantity,
        })?;
    }

    for (i, (name, email)) in USERS.iter().enumerate() {
        storage.insert_user(&User {
            user_id: format!("user-{:02}", i + 1),
            name: name.to_string(),
            email: email.to_string(),
        })?;
    }

    let today = Utc::now();
    for day in 0..days {
        let date = today - Duration::days(day);
        // Small deterministic wobble so the charts are not flat.
        let wave = ((day * 37) % 11) as f64 - 5.0;

        storage.insert_sales_summary(&SalesSummary {
            sales_summary_id: format!("sales-{day:03}"),
            total_value: 12_000.0 + wave * 310.0,
            change_percentage: Some(wave * 1.5),
            date,
        })?;
        storage.insert_purchase_summary(&PurchaseSummary {
            purchase_summary_id: format!("purchase-{day:03}"),
            total_purchased: 7_500.0 - wave * 120.0,
            change_percentage: Some(-wave),
            date,
        })?;
        storage.insert_expense_summary(&ExpenseSummary {
            expense_summary_id: format!("expense-{day:03}"),
            total_expenses: 4_200.0 + wave * 75.0,
            change_percentage: None,
            date,
        })?;
        for (c, category) in CATEGORIES.iter().enumerate() {
            storage.insert_expense_by_category(&ExpenseByCategorySummary {
                expense_by_category_summary_id: format!("expense-{day:03}-{c}"),
                category: category.to_string(),
                amount: 1_000 + (c as i64 + 1) * 250 + (wave as i64) * 40,
                date,
            })?;
        }
    }

    println!(
        "✅ Loaded {} products, {} users and {days} days of dashboard summaries",
        PRODUCTS.len(),
        USERS.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let storage = Storage::open(&args.database)
        .with_context(|| format!("failed to open database at {}", args.database))?;

    if args.reset_admin {
        reset_admin(&storage, args)?;
    } else {
        seed(&storage, args.days)?;
    }

    storage.flush().await?;
    Ok(())
}
