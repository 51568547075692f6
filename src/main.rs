use anyhow::Result;
use relink::{init_tracing_once, ChannelFormat, FileStore, NdjsonChannel, Resubmitter, SubmitOptions};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_OUT: &str = "./channel/mdm-submit.ndjson";

/// relink [TYPE|all|Type/id] [CRITERIA]
fn main() -> Result<()> {
    init_tracing_once();

    let mut args = std::env::args().skip(1);
    let target = args.next().unwrap_or_else(|| "all".to_string());
    let criteria = args.next();

    let opts = SubmitOptions::from_env();
    let out = std::env::var("RELINK_OUT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_OUT));
    let format = if out.extension().and_then(|e| e.to_str()) == Some("zst") { ChannelFormat::Zst } else { ChannelFormat::Jsonl };

    let store = FileStore::with_read_buffer(&opts.store_dir, opts.read_buffer_bytes)?;
    tracing::info!("Store {} holds types {:?}", store.dir().display(), store.discover_types()?);

    let registry = store.registry(&opts.types);
    let mut registered: Vec<&str> = registry.types().collect();
    registered.sort_unstable();
    tracing::info!("Submitting through stores for {:?}", registered);

    let channel = Arc::new(NdjsonChannel::create(&out, format, opts.write_buffer_bytes)?);
    let submitter = Resubmitter::new(registry.clone(), channel.clone())
        .options(opts)
        .transactions(Arc::new(store.clone()));

    let submitted = if target == "all" {
        submitter.submit_all(criteria.as_deref())?
    } else if target.contains('/') {
        submitter.submit_one_str(&target)?
    } else {
        submitter.submit_type(&target, criteria.as_deref())?
    };
    channel.finish()?;

    println!("Submitted {} resources to {}", submitted, channel.path().display());
    Ok(())
}
