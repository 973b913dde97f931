use statvar_import::config::ImportConfig;
use statvar_import::counters::Counters;
use statvar_import::mcf::filter::McfFilter;
use statvar_import::mcf::loader::{load_files_concurrently, LoadOptions};
use statvar_import::mcf::merge::MergePolicy;
use statvar_import::mcf::shard::{write_shards, ShardOptions};
use statvar_import::mcf::writer::{write_mcf_file, WriteOptions};
use statvar_import::mcf::McfDiffer;
use statvar_import::pvmap::{PropertyValues, PvMap};
use statvar_import::sampler::{SampleOptions, Sampler};
use statvar_import::statvar::{generate_statvar_dcid, write_outputs, StatVarProcessor};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statvar-import")]
#[command(about = "Statistical variable import: PV mapping and MCF tools")]
#[command(version)]
struct Args {
    /// JSON config file (or set STATVAR_IMPORT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Config override as key=value; may be repeated
    #[arg(long = "set", global = true)]
    overrides: Vec<String>,

    /// Write counters as JSON to this file
    #[arg(long, global = true)]
    counters_output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert CSV tables into statvars, observations and a TMCF
    Process {
        /// Input CSV files, processed in order
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// PV map files as [namespace:]path
        #[arg(short, long, required = true, num_args = 1..)]
        pv_map: Vec<String>,

        /// Prefix for the output files
        #[arg(short, long)]
        output_prefix: String,
    },
    /// Compare two sets of MCF files
    Diff {
        #[arg(long, required = true, num_args = 1..)]
        left: Vec<PathBuf>,

        #[arg(long, required = true, num_args = 1..)]
        right: Vec<PathBuf>,

        /// Property left out of the comparison; may be repeated
        #[arg(long)]
        ignore_property: Vec<String>,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit with status 1 when the inputs differ
        #[arg(long)]
        fail_on_diff: bool,
    },
    /// Merge MCF files into one, deduplicating nodes by key
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// append, replace or keep-first
        #[arg(long, default_value = "append")]
        policy: MergePolicy,

        #[arg(long)]
        sort_properties: bool,
    },
    /// Redistribute MCF nodes across a fixed number of shards
    Shard {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output_prefix: PathBuf,

        /// Defaults to num_shards from the config
        #[arg(short, long)]
        num_shards: Option<usize>,

        #[arg(long, default_value = "append")]
        policy: MergePolicy,
    },
    /// Select nodes from MCF files
    Filter {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// Node keys to keep; keeps all when not given
        #[arg(long)]
        keep: Vec<String>,

        #[arg(long)]
        drop: Vec<String>,

        /// property=value every kept node must carry
        #[arg(long)]
        require: Vec<String>,

        #[arg(long)]
        drop_property: Vec<String>,
    },
    /// Sample rows of a large CSV input
    Sample {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the generated dcid for a set of statvar PVs
    Dcid {
        /// property=value; may be repeated
        #[arg(long = "pv", required = true)]
        pvs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config_path = ImportConfig::resolve_path(args.config.clone());
    let config = ImportConfig::load(config_path.as_deref(), &args.overrides)
        .context("Failed to load config")?;
    let counters = Counters::new();

    let mut counters_output = args.counters_output.clone();
    let mut exit_code = 0;
    match args.command {
        Commands::Process {
            input,
            pv_map,
            output_prefix,
        } => {
            counters_output.get_or_insert_with(|| PathBuf::from(format!("{}_counters.json", output_prefix)));
            run_process(config, &input, &pv_map, &output_prefix, &counters)?;
        }
        Commands::Diff {
            left,
            right,
            ignore_property,
            output,
            fail_on_diff,
        } => {
            let differs =
                run_diff(&config, &left, &right, ignore_property, output.as_deref(), &counters).await?;
            if differs && fail_on_diff {
                exit_code = 1;
            }
        }
        Commands::Merge {
            inputs,
            output,
            policy,
            sort_properties,
        } => {
            let nodes = load_all(&config, &inputs, policy, &counters).await?;
            let options = WriteOptions {
                sort_nodes: true,
                sort_properties,
                ..WriteOptions::default()
            };
            write_mcf_file(&output, &nodes, &options)
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
        Commands::Shard {
            inputs,
            output_prefix,
            num_shards,
            policy,
        } => {
            let nodes = load_all(&config, &inputs, policy, &counters).await?;
            counters.set("mcf-unique-nodes", nodes.len() as i64);
            let options = ShardOptions {
                num_shards: num_shards.unwrap_or(config.num_shards).max(1),
                policy,
                multi_value_properties: config.multi_value_properties.clone(),
                sort_properties: false,
            };
            let written = write_shards(nodes, &output_prefix, &options, &counters)?;
            info!("Wrote {} shards", written.len());
        }
        Commands::Filter {
            inputs,
            output,
            keep,
            drop,
            require,
            drop_property,
        } => {
            let nodes = load_all(&config, &inputs, MergePolicy::Append, &counters).await?;
            let filter = McfFilter {
                keep_keys: keep.into_iter().collect(),
                drop_keys: drop.into_iter().collect(),
                require_pvs: Vec::new(),
                drop_properties: drop_property,
            }
            .with_required(&require);
            let kept = filter.apply(nodes);
            counters.set("mcf-filtered-nodes", kept.len() as i64);
            write_mcf_file(&output, &kept, &WriteOptions::default())
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
        Commands::Sample { input, output } => {
            let mut sampler = Sampler::new(SampleOptions::from(&config));
            sampler
                .sample_file(&input, &output, &counters)
                .with_context(|| format!("Failed to sample {}", input.display()))?;
        }
        Commands::Dcid { pvs } => {
            let mut statvar = PropertyValues::new();
            for pv in &pvs {
                let (prop, value) = pv
                    .split_once('=')
                    .with_context(|| format!("'{}' is not of the form property=value", pv))?;
                statvar.insert(prop.trim().to_string(), value.trim().to_string());
            }
            println!("{}", generate_statvar_dcid(&statvar, &config.statvar_dcid_ignore_properties));
        }
    }

    counters.log_summary();
    if let Some(path) = counters_output {
        counters
            .write_json(&path)
            .with_context(|| format!("Failed to write counters to {}", path.display()))?;
    }
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn run_process(
    config: ImportConfig,
    inputs: &[PathBuf],
    pv_map_specs: &[String],
    output_prefix: &str,
    counters: &Counters,
) -> Result<()> {
    let mut pv_map = PvMap::new();
    for spec in pv_map_specs {
        pv_map
            .load_file_spec(spec)
            .with_context(|| format!("Failed to load PV map {}", spec))?;
    }
    info!("PV map has {} entries", pv_map.len());

    let output_config = config.clone();
    let mut processor = StatVarProcessor::new(config, pv_map, counters.clone())?;
    processor.process_files(inputs).context("Failed to process input")?;
    let result = processor.finish();

    let files = write_outputs(&result, output_prefix, &output_config, counters)?;
    println!("Statvars:     {}", files.statvar_mcf.display());
    println!("Observations: {}", files.csv.display());
    println!("TMCF:         {}", files.tmcf.display());
    Ok(())
}

async fn load_all(
    config: &ImportConfig,
    inputs: &[PathBuf],
    policy: MergePolicy,
    counters: &Counters,
) -> Result<statvar_import::mcf::McfNodes> {
    let options = LoadOptions {
        max_concurrent: config.max_concurrent_files,
        policy,
        multi_value_properties: config.multi_value_properties.clone(),
        ..LoadOptions::default()
    };
    let nodes = load_files_concurrently(inputs, &options, counters)
        .await
        .context("Failed to load MCF files")?;
    Ok(nodes)
}

async fn run_diff(
    config: &ImportConfig,
    left: &[PathBuf],
    right: &[PathBuf],
    ignore_properties: Vec<String>,
    output: Option<&Path>,
    counters: &Counters,
) -> Result<bool> {
    let left_nodes = load_all(config, left, MergePolicy::Append, counters).await?;
    let right_nodes = load_all(config, right, MergePolicy::Append, counters).await?;

    let mut ignore = config.diff_ignore_properties.clone();
    ignore.extend(ignore_properties);
    let diff = McfDiffer::new(ignore).compare(&left_nodes, &right_nodes);
    diff.record(counters);

    let report = diff.to_text();
    match output {
        Some(path) => std::fs::write(path, &report)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", report),
    }
    info!(
        "Diff: {} added, {} deleted, {} modified, {} matched",
        diff.added.len(),
        diff.deleted.len(),
        diff.modified.len(),
        diff.matched
    );
    Ok(diff.has_differences())
}
