use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use contact_layout::contacts::{CONTACT_RADIUS, group_color};
use contact_layout::graph::NodeSpec;
use contact_layout::query::SearchMatches;
use contact_layout::snapshot::{parse_request, render_layout};
use contact_layout::{GraphModel, LayoutSettings, SimulationScheduler, TriggerReason};
use emath::pos2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Graph snapshot JSON; a demo star graph is used when omitted.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    #[arg(long)]
    iterations: Option<usize>,
    /// Seed for the placement of nodes added to the demo graph.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    #[arg(long)]
    repulsion: Option<f32>,
    #[arg(long)]
    spring: Option<f32>,
    #[arg(long)]
    gravity: Option<f32>,
    #[arg(long)]
    damping: Option<f32>,
    #[arg(long)]
    rest_length: Option<f32>,
    /// Report which nodes a search for this text would leave undimmed.
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    pretty: bool,
}

impl Args {
    fn apply_overrides(&self, mut settings: LayoutSettings) -> LayoutSettings {
        let constants = &mut settings.constants;
        if let Some(iterations) = self.iterations {
            settings.iterations = iterations;
        }
        if let Some(repulsion) = self.repulsion {
            constants.repulsion = repulsion;
        }
        if let Some(spring) = self.spring {
            constants.spring = spring;
        }
        if let Some(gravity) = self.gravity {
            constants.gravity = gravity;
        }
        if let Some(damping) = self.damping {
            constants.damping = damping;
        }
        if let Some(rest_length) = self.rest_length {
            constants.rest_length = rest_length;
        }
        settings
    }
}

fn demo_model(seed: u64) -> Result<GraphModel> {
    let mut model = GraphModel::seeded(pos2(400.0, 300.0), seed);
    let me = model.add_node(NodeSpec::new("Me", 24.0).with_color("#222222"))?;
    model.set_anchor(&me)?;

    for (name, role) in [
        ("Ada", "analyst"),
        ("Grace", "engineer"),
        ("Linus", "engineer"),
        ("Barbara", "friend"),
    ] {
        let contact = model.add_node(
            NodeSpec::new(name, CONTACT_RADIUS)
                .with_color(group_color(role))
                .with_group(role),
        )?;
        model.add_link(&me, &contact, 0.8)?;
    }
    Ok(model)
}

fn load_model(args: &Args) -> Result<(GraphModel, LayoutSettings)> {
    let Some(path) = &args.snapshot else {
        return Ok((demo_model(args.seed)?, LayoutSettings::default()));
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let request = parse_request(&raw)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
    let settings = request.settings.unwrap_or_default();
    let model = GraphModel::from_snapshot(request.snapshot, StdRng::seed_from_u64(args.seed))
        .with_context(|| format!("snapshot {} violates graph invariants", path.display()))?;
    Ok((model, settings))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let (mut model, settings) = load_model(&args)?;
    let settings = args.apply_overrides(settings);

    let mut scheduler =
        SimulationScheduler::new(settings).context("failed to start layout scheduler")?;
    scheduler
        .trigger(TriggerReason::InitialLoad, &model)
        .context("failed to schedule layout")?;
    let result = scheduler
        .wait(&mut model)
        .context("layout run failed")?
        .ok_or_else(|| anyhow!("layout run produced no result"))?;

    if let Some(query) = &args.search {
        let search = SearchMatches::compute(model.nodes(), query, model.revision());
        let mut matched = search
            .matches()
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>();
        matched.sort();
        info!(query = search.query(), ?matched, "search matches");
    }

    println!("{}", render_layout(&result, args.pretty)?);
    Ok(())
}
