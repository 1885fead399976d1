use std::path::PathBuf;

use anesthesia_core::{CollectionScope, EngineConfig, MutationCoordinator};
use anesthesia_records::{read_document_str, AdapterConfig, KeyTable};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const COLLECTION: &str = "chart";

#[derive(Parser, Debug)]
#[command(
    name = "anesthesia-cli",
    about = "Dựng lại trạng thái đường truyền và liều gần nhất từ lô bản ghi gây mê JSON."
)]
struct Args {
    /// Đường dẫn tới file JSON chứa bản ghi (mảng hoặc {"records": [...], "items": {...}}).
    #[arg(short, long)]
    input: PathBuf,

    /// Bảng tên mục riêng; mặc định dùng trường "items" trong file input.
    #[arg(long)]
    items: Option<PathBuf>,

    /// Đồng hồ tham chiếu: mili giây epoch hoặc RFC 3339. Mặc định là giờ hiện tại.
    #[arg(long)]
    now: Option<String>,

    /// Chỉ tổng hợp các luồng có khóa bắt đầu bằng tiền tố này.
    #[arg(long)]
    collection_prefix: Option<String>,

    /// Bỏ qua bản ghi có loại không xác định thay vì báo lỗi.
    #[arg(long)]
    skip_unknown_kinds: bool,

    /// In view dạng JSON.
    #[arg(long)]
    json: bool,

    /// Mức log khi RUST_LOG không được đặt.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let data = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Không đọc được file {:?}", args.input))?;
    let adapter_cfg = AdapterConfig {
        skip_unknown_kinds: args.skip_unknown_kinds,
    };
    let document = read_document_str(&data, &adapter_cfg)
        .with_context(|| format!("Không chuẩn hóa được {:?}", args.input))?;

    let items = match &args.items {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Không đọc được file {path:?}"))?;
            KeyTable::parse_str(&raw).with_context(|| format!("Bảng tên không hợp lệ: {path:?}"))?
        }
        None => document.items,
    };

    let now = parse_now(args.now.as_deref())?;
    let scope = match args.collection_prefix {
        Some(prefix) => CollectionScope::Prefix(prefix),
        None => CollectionScope::All,
    };

    let coordinator = MutationCoordinator::new(EngineConfig::default());
    coordinator.register_collection(COLLECTION, scope, items);
    coordinator
        .load(document.batch.events)
        .context("Lô sự kiện bị từ chối")?;

    let view = coordinator.view(COLLECTION, now)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!(
        "Reference clock: {}\nRejected records: {}\nSkipped records: {}",
        format_clock(now),
        document.batch.rejected.len(),
        document.batch.skipped
    );
    for rejection in &document.batch.rejected {
        println!("  #{}: {}", rejection.index, rejection.error);
    }

    println!("\nStreams:");
    for (key, state) in &view.streams {
        match state.active_since() {
            Some(since) => println!(
                "  {key}: running since {} ({} min total)",
                format_clock(since),
                state.running_duration(now).num_minutes()
            ),
            None => println!("  {key}: stopped ({} intervals)", state.intervals.len()),
        }
    }

    println!("\nLast values:");
    for entry in &view.last_values {
        if entry.summary.is_empty() {
            println!("  {}: {:?} ({})", entry.label, entry.kind, entry.age);
        } else {
            println!("  {}: {} ({})", entry.label, entry.summary, entry.age);
        }
    }

    Ok(())
}

fn init_tracing(default_level: &str) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("Không khởi tạo được tracing")?;

    tracing::debug!(log_level = default_level, "tracing initialized");
    Ok(())
}

fn parse_now(raw: Option<&str>) -> anyhow::Result<i64> {
    let Some(raw) = raw else {
        return Ok(Utc::now().timestamp_millis());
    };
    if let Ok(ms) = raw.trim().parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.timestamp_millis())
        .with_context(|| format!("Đồng hồ tham chiếu không hợp lệ: {raw}"))
}

fn format_clock(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
