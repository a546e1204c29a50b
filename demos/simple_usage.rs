//! Complete slotdb API Demo
//!
//! Demonstrates the main engine operations:
//! - Catalog (databases and collections)
//! - CRUD operations (Insert, Read, Update, Delete)
//! - Filtering, ordering and projection
//! - Serialized requests with authorization

use serde_json::json;
use slotdb::auth::{GrantTable, Permission, Scope};
use slotdb::core::config::Config;
use slotdb::core::database::Database;
use slotdb::core::logging;
use slotdb::core::types::Record;
use slotdb::query::ast::{Action, CompareOp, FilterNode, Order, Response, Target};
use slotdb::queue::serializer::Serializer;
use slotdb::schema::schema::Schema;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::with_home("./demo_data");
    config.apply_env(|key| std::env::var(key).ok())?;
    logging::init(&config.log_level);

    println!("\n╔═══════════════════════════════════════════════╗");
    println!("║        slotdb - Complete API Demo             ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    // Step 1: Catalog
    println!("Step 1: Creating database and collection...");
    let mut db = Database::open(config)?;
    if !db.databases().contains(&"library".to_string()) {
        db.create_database("library")?;
        db.create_collection(
            "library",
            "books",
            Schema::collection(&json!({
                "title": "string",
                "year": "int",
                "tags": ["string"],
                "available": "bool"
            }))?,
        )?;
    }
    println!("  Searchable keys: {:?}\n", db.searchable_keys("library", "books")?);

    // Step 2: INSERT
    println!("Step 2: INSERT - Adding records...");
    let ids = db.insert(
        "library",
        "books",
        vec![
            book("Rust Programming", 2018, &["rust", "systems"]),
            book("Database Systems", 2011, &["databases"]),
            book("Web Development", 2020, &["web"]),
        ],
    )?;
    println!("  Inserted {:?}\n", ids);

    // Step 3: FILTER
    println!("Step 3: GET - Filtering records...");
    let recent = FilterNode::compare("year", CompareOp::Gte, json!(2015));
    let titles = vec!["title".to_string(), "year".to_string()];
    for record in db.get("library", "books", Some(&recent), Some(&Order::desc("year")), None, Some(titles.as_slice()))? {
        println!("  {}", serde_json::Value::Object(record));
    }
    println!();

    // Step 4: UPDATE
    println!("Step 4: UPDATE - Marking a record unavailable...");
    let patch = json!({"available": false}).as_object().cloned().unwrap_or_default();
    db.update("library", "books", &ids[..1], &patch)?;
    let unavailable = FilterNode::eq("available", json!(false));
    println!("  Unavailable: {}\n", db.count("library", "books", Some(&unavailable))?);

    // Step 5: SERIALIZED REQUESTS
    println!("Step 5: Serialized requests...");
    let mut grants = GrantTable::new();
    grants.grant("librarian", Permission::Update, Scope::database("library"));
    grants.grant("visitor", Permission::Read, Scope::collection("library", "books"));
    let grants_path = db.storage().grants_path();
    grants.save(&grants_path)?;
    let grants = GrantTable::load(&grants_path)?;
    let serializer = Serializer::start(db, Box::new(grants))?;

    let delete = Action::Delete {
        db: "library".into(),
        collection: "books".into(),
        target: Target::Ids(ids.clone()),
    };
    match serializer.execute("visitor", delete.clone()) {
        Ok(_) => println!("  visitor delete: allowed"),
        Err(e) => println!("  visitor delete: {}", e),
    }
    if let Response::Count(n) = serializer.execute("librarian", delete)? {
        println!("  librarian delete: removed {}", n);
    }

    serializer.shutdown()?;
    println!("\nDone!");
    Ok(())
}

fn book(title: &str, year: i64, tags: &[&str]) -> Record {
    json!({"title": title, "year": year, "tags": tags, "available": true})
        .as_object()
        .cloned()
        .unwrap_or_default()
}
