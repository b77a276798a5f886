use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use catalog::client::CatalogClient;
use catalog::model::{ImageType, Laptop};
use catalog::parser::{self, Command};
use catalog::{sample, serializer};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Interactive client for the laptop catalog", long_about = None)]
struct CliConfig {
    /// Address of the catalog server
    #[clap(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Deadline applied to every call, in seconds
    #[clap(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_target(false)
    .init();

    let config = CliConfig::parse();
    let mut client = CatalogClient::new(config.addr.clone());
    if let Some(secs) = config.timeout_secs {
        client = client.with_timeout(Duration::from_secs(secs));
    }

    print_banner();
    if tokio::net::TcpStream::connect(&config.addr).await.is_err() {
        println!("[\u{2717}] Could not connect to server at {}.", config.addr);
        println!("    Make sure 'catalogd' is running in another terminal.");
        return;
    }
    println!("[\u{2713}] Connected to catalog at {}!", config.addr);
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("catalog> ");
        let _ = io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                println!("[\u{2717}] Failed to read input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&line) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&client, cmd).await {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if line.to_uppercase().starts_with("SEARCH") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'SEARCH WHERE PRICE <= 3000 AND CORES >= 4 AND RAM >= 8 GB'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   Catalog CLI - Laptops, Searches and Images");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. CREATE:  CREATE [count] | CREATE ID='uuid' | CREATE FROM \"laptop.json\"");
    println!("2. SEARCH:  SEARCH WHERE PRICE <= 3000 AND CORES >= 4 AND GHZ >= 2.5 AND RAM >= 8 GB");
    println!("3. UPLOAD:  UPLOAD 'uuid' \"image.jpg\" [AS JPG|PNG]");
    println!("4. SAMPLE:  SAMPLE \"laptop.bin\"   (writes a random laptop; .json for JSON)");
    println!("5. EXIT:    Quit\n");
}

async fn execute_command(client: &CatalogClient, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Create { count } => {
            for _ in 0..count {
                perform_create(client, sample::new_laptop()).await?;
            }
            Ok(())
        }
        Command::CreateWithId { id } => {
            let mut laptop = sample::new_laptop();
            laptop.id = id.to_string();
            perform_create(client, laptop).await
        }
        Command::CreateFromFile { path } => {
            let laptop = serializer::read_file(Path::new(&path)).map_err(|e| format!("cannot read {}: {}", path, e))?;
            perform_create(client, laptop).await
        }
        Command::Search { filter } => {
            let mut stream = client.search_laptop(filter).await.map_err(|s| s.to_string())?;
            let mut found = 0usize;
            println!();
            while let Some(laptop) = stream.next().await.map_err(|s| s.to_string())? {
                found += 1;
                println!(
                    "  \u{2022} {} {} {} (${:.2}, {} cores @ {:.2} GHz, {} {:?})",
                    laptop.id,
                    laptop.brand,
                    laptop.name,
                    laptop.price_usd,
                    laptop.cpu.number_cores,
                    laptop.cpu.min_ghz,
                    laptop.ram.value,
                    laptop.ram.unit,
                );
            }
            println!("\nFound {} matches.\n", found);
            Ok(())
        }
        Command::Upload { laptop_id, path, image_type } => perform_upload(client, laptop_id, &path, image_type).await,
        Command::Sample { path } => {
            let laptop = sample::new_laptop();
            serializer::write_file(&laptop, Path::new(&path)).map_err(|e| format!("cannot write {}: {}", path, e))?;
            println!("[\u{2713} OK] Wrote laptop {} to {}", laptop.id, path);
            Ok(())
        }
        // handled by the REPL loop
        Command::Exit => Ok(()),
    }
}

async fn perform_create(client: &CatalogClient, laptop: Laptop) -> Result<(), String> {
    let id = client.create_laptop(laptop).await.map_err(|s| s.to_string())?;
    println!("[\u{2713} OK] Created laptop {}", id);
    Ok(())
}

async fn perform_upload(
    client: &CatalogClient,
    laptop_id: Uuid,
    path: &str,
    image_type: Option<ImageType>,
) -> Result<(), String> {
    let data = tokio::fs::read(path).await.map_err(|e| format!("cannot read {}: {}", path, e))?;
    let image_type = image_type.unwrap_or_else(|| {
        Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(ImageType::from_extension)
        .unwrap_or_default()
    });
    debug!("uploading {} bytes as {:?}", data.len(), image_type);

    let response = client
    .upload_image(&laptop_id.to_string(), image_type, &data)
    .await
    .map_err(|s| s.to_string())?;
    println!("[\u{2713} OK] Uploaded image {} ({} bytes)", response.id, response.size);
    Ok(())
}
