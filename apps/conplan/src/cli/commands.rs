//! # CLI Command Implementations
//!
//! Each command reads its inputs, runs one engine stage and writes the
//! result. Warnings are logged by the engine as they arise and repeated in
//! the command output.

use crate::config::ProjectConfig;
use conplan_core::features::appended_path;
use conplan_core::posthoc::{posthoc_table, selected_units};
use conplan_core::{
    Bound, BoundaryMode, ConplanError, EdgeRule, FeatureTables, InputDat,
    LockRule, MatrixFormat, MetricStore, OutputSelection, SpatialMatcher, Table, TracingProgress,
    UnitScope, UnitSet, Warning, apply_status, base_status, discretize, evaluate, locate_optimizer,
    read_connectivity, read_geometry, rescale_data, write_connectivity,
};
use conplan_core::formats::{ConnectivityData, write_mean_of_times};
use conplan_core::marxan::load_output;
use std::collections::BTreeSet;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Check that the directory an output goes to exists.
fn validate_output_path(path: &Path) -> Result<(), ConplanError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    if !parent.is_dir() {
        return Err(ConplanError::Io(format!(
            "Output directory '{}' does not exist",
            parent.display()
        )));
    }
    Ok(())
}

fn create_file(path: &Path) -> Result<BufWriter<std::fs::File>, ConplanError> {
    validate_output_path(path)?;
    let file = std::fs::File::create(path)
        .map_err(|e| ConplanError::Io(format!("Cannot create '{}': {}", path.display(), e)))?;
    Ok(BufWriter::new(file))
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn print_warnings(warnings: &[Warning]) {
    if warnings.is_empty() {
        return;
    }
    println!();
    println!("Warnings:");
    for warning in warnings {
        println!("  - {}", warning);
    }
}

fn read_units(path: &Path) -> Result<UnitSet, ConplanError> {
    UnitSet::from_document(&read_geometry(path)?)
}

fn paths(list: &[PathBuf]) -> Vec<String> {
    list.iter().map(|p| p.display().to_string()).collect()
}

// =============================================================================
// SUMMARY (DEFAULT)
// =============================================================================

/// Show the project inputs and the metrics they make eligible.
pub fn cmd_summary(project: &Path, json_mode: bool) -> Result<(), ConplanError> {
    let config = ProjectConfig::load(project)?;
    let outcome = config.open_session(&TracingProgress)?;
    let session = outcome.value;

    let mut eligible = Vec::new();
    for source in session.sources() {
        for scope in [UnitScope::PlanningUnit, UnitScope::ConnectivityUnit] {
            if let Some(availability) = session.availability(source, scope) {
                let names: Vec<String> = availability
                    .eligible()
                    .iter()
                    .map(|k| k.qualified_name(source, scope))
                    .collect();
                eligible.push((source, scope, names));
            }
        }
    }

    if json_mode {
        let output = serde_json::json!({
            "project": project.to_string_lossy(),
            "planning_units": session.planning_units().units.len(),
            "eligible": eligible
                .iter()
                .map(|(source, scope, names)| serde_json::json!({
                    "source": source.tag(),
                    "scope": scope.tag(),
                    "metrics": names,
                }))
                .collect::<Vec<_>>(),
            "warnings": outcome.warnings,
        });
        print_json(&output);
        return Ok(());
    }

    println!("conplan Project");
    println!("===============");
    println!("Project:        {}", project.display());
    println!("Planning units: {}", session.planning_units().units.len());
    for (source, scope, names) in &eligible {
        println!();
        println!("{} / {}:", source.tag(), scope.tag());
        for name in names {
            println!("  {}", name);
        }
    }
    print_warnings(&outcome.warnings);
    Ok(())
}

// =============================================================================
// RESCALE COMMAND
// =============================================================================

/// Rescale connectivity from connectivity units to planning units.
pub fn cmd_rescale(
    json_mode: bool,
    matrix: &Path,
    format: &str,
    units: &Path,
    planning_units: &Path,
    edge_rule: &str,
    output: &Path,
    mean_output: Option<&Path>,
) -> Result<(), ConplanError> {
    let format: MatrixFormat = format.parse()?;
    let rule: EdgeRule = edge_rule.parse()?;
    let mut warnings = Vec::new();

    let data = read_connectivity(matrix, format)?.collect_into(&mut warnings);
    let fine = read_units(units)?;
    let planning = read_units(planning_units)?;
    data.primary().ensure_within(&fine.ids())?;

    let mapping = SpatialMatcher::new(rule)
        .match_units(&fine, &planning, &TracingProgress)?
        .collect_into(&mut warnings);
    let rescaled = rescale_data(&data, &mapping, &TracingProgress);
    write_connectivity(&rescaled, format, create_file(output)?)?;

    let mut written = vec![output.to_path_buf()];
    if let Some(mean_path) = mean_output {
        let ConnectivityData::Temporal(temporal) = &rescaled else {
            return Err(ConplanError::Configuration(
                "A mean-of-times matrix needs data in the Edge List with Time format".to_string(),
            ));
        };
        write_mean_of_times(temporal, create_file(mean_path)?)?;
        written.push(mean_path.to_path_buf());
    }

    let primary = rescaled.primary();
    if json_mode {
        print_json(&serde_json::json!({
            "written": paths(&written),
            "planning_units": primary.node_count(),
            "connections": primary.edge_count(),
            "warnings": warnings,
        }));
        return Ok(());
    }

    println!("Rescaled {} connectivity units onto {} planning units", fine.units.len(), planning.units.len());
    println!("Connections: {}", primary.edge_count());
    for path in &written {
        println!("Written:     {}", path.display());
    }
    print_warnings(&warnings);
    Ok(())
}

// =============================================================================
// METRICS COMMAND
// =============================================================================

/// Compute the metrics selected in the project file.
pub fn cmd_metrics(
    project: &Path,
    json_mode: bool,
    output: &Path,
    scope: &str,
) -> Result<(), ConplanError> {
    let scope: UnitScope = scope.parse()?;
    let config = ProjectConfig::load(project)?;
    let mut warnings = Vec::new();
    let mut session = config
        .open_session(&TracingProgress)?
        .collect_into(&mut warnings);

    let requests = config.metric_requests()?;
    let skipped = session
        .recalculate(&requests, &TracingProgress)?
        .collect_into(&mut warnings);

    let table = session.metrics().to_table(scope);
    validate_output_path(output)?;
    table.write_path(output)?;

    let computed: Vec<&str> = table.headers.iter().skip(1).map(String::as_str).collect();
    let skipped: Vec<&str> = skipped.iter().map(|k| k.name()).collect();
    if json_mode {
        print_json(&serde_json::json!({
            "output": output.to_string_lossy(),
            "computed": computed,
            "skipped": skipped,
            "warnings": warnings,
        }));
        return Ok(());
    }

    println!("Metrics written to {}", output.display());
    for name in &computed {
        println!("  {}", name);
    }
    if !skipped.is_empty() {
        println!("Not eligible with the current inputs: {}", skipped.join(", "));
    }
    print_warnings(&warnings);
    Ok(())
}

// =============================================================================
// DISCRETIZE COMMAND
// =============================================================================

/// Threshold a metric of a metrics CSV into a binary metric.
pub fn cmd_discretize(
    json_mode: bool,
    metrics: &Path,
    metric: &str,
    from: &str,
    to: &str,
    lock: Option<&str>,
    scope: &str,
    output: Option<&Path>,
) -> Result<(), ConplanError> {
    let scope: UnitScope = scope.parse()?;
    let from: Bound = from.parse()?;
    let to: Bound = to.parse()?;
    let lock: Option<LockRule> = lock.map(str::parse).transpose()?;

    let mut store = MetricStore::from_table(&Table::read_path(metrics)?, scope)?;
    let base = store
        .get(metric)
        .ok_or_else(|| ConplanError::Configuration(format!("No metric named '{}'", metric)))?;
    let derived = discretize(base, from, to, lock)?;
    let name = derived.name.clone();
    let flagged = derived.values.values().filter(|v| **v != 0.0).count();
    store.insert(derived);

    let output = output.unwrap_or(metrics);
    validate_output_path(output)?;
    store.to_table(scope).write_path(output)?;

    if json_mode {
        print_json(&serde_json::json!({
            "metric": name,
            "flagged": flagged,
            "output": output.to_string_lossy(),
        }));
        return Ok(());
    }

    println!("Added {} ({} units flagged)", name, flagged);
    println!("Written: {}", output.display());
    Ok(())
}

// =============================================================================
// PRE-EVALUATION COMMAND
// =============================================================================

/// Summarize a planning-unit metric against the project's areas.
pub fn cmd_preeval(
    project: &Path,
    json_mode: bool,
    metrics: &Path,
    metric: &str,
) -> Result<(), ConplanError> {
    let config = ProjectConfig::load(project)?;
    let mut session = config.open_areas()?;
    let table = Table::read_path(metrics)?;
    session.set_metrics(MetricStore::from_table(&table, UnitScope::PlanningUnit)?);
    let summary = session.metric_summary(metric)?;

    if json_mode {
        print_json(&serde_json::json!({
            "metric": metric,
            "summary": summary,
        }));
        return Ok(());
    }

    let percent = |p: Option<f64>| p.map_or_else(|| "NA".to_string(), |v| format!("{:.1}", v));
    println!("{}", metric);
    println!("  Sum:                {}", summary.sum);
    println!("  Mean:               {}", summary.mean);
    println!("  Std. deviation:     {}", summary.std);
    println!("  Minimum:            {}", summary.min);
    println!("  Lower quartile:     {}", summary.lower_quartile);
    println!("  Median:             {}", summary.median);
    println!("  Upper quartile:     {}", summary.upper_quartile);
    println!("  Maximum:            {}", summary.max);
    println!("  % in avoidance area: {}", percent(summary.avoidance_percent));
    println!("  % in focus area:     {}", percent(summary.focus_percent));
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Write spec, amount, boundary and pu.dat files for the project.
pub fn cmd_export(
    project: &Path,
    json_mode: bool,
    metrics: Option<&Path>,
) -> Result<(), ConplanError> {
    let config = ProjectConfig::load(project)?;
    let mut warnings = Vec::new();
    let mut session = config
        .open_session(&TracingProgress)?
        .collect_into(&mut warnings);

    match metrics {
        Some(path) => {
            let table = Table::read_path(path)?;
            session.set_metrics(MetricStore::from_table(&table, UnitScope::PlanningUnit)?);
        }
        None => {
            let requests: Vec<_> = config
                .metric_requests()?
                .into_iter()
                .filter(|r| r.scope == UnitScope::PlanningUnit)
                .collect();
            session
                .recalculate(&requests, &TracingProgress)?
                .collect_into(&mut warnings);
        }
    }

    let output_dir = config.resolve(&config.export.output_dir);
    std::fs::create_dir_all(&output_dir).map_err(|e| {
        ConplanError::Io(format!("Cannot create '{}': {}", output_dir.display(), e))
    })?;
    let mut written = Vec::new();

    // Features
    let mut tables = session.features(config.export.features.as_deref())?;
    let mut spec_path = config.export_path(&config.export.spec);
    let mut amount_path = config.export_path(&config.export.amounts);
    if config.export.append && spec_path.is_file() && amount_path.is_file() {
        let existing = FeatureTables::from_tables(
            &Table::read_path(&spec_path)?,
            &Table::read_path(&amount_path)?,
        )?;
        tables = existing.append(tables);
        spec_path = appended_path(&spec_path);
        amount_path = appended_path(&amount_path);
    }
    tables.spec_table().write_path(&spec_path)?;
    tables.amount_table().write_path(&amount_path)?;
    written.push(spec_path);
    written.push(amount_path);

    // Boundary
    let boundaries = session
        .boundaries(&[], &config.export_path(&config.export.boundary))
        .collect_into(&mut warnings);
    for boundary in &boundaries {
        boundary.write()?;
        written.push(boundary.path.clone());
    }

    // Status
    let existing_pu = config
        .export
        .existing_pu
        .as_deref()
        .map(|p| Table::read_path(config.resolve(p)))
        .transpose()?;
    let base = match &existing_pu {
        Some(table) => base_status(table)?,
        None => Default::default(),
    };
    let pu_path = config.export_path(&config.export.pu);
    apply_status(existing_pu, &session.status(&base))?.write_path(&pu_path)?;
    written.push(pu_path);

    // Optimizer input file
    if let Some(input_path) = &config.export.input_dat {
        let input_path = config.resolve(input_path);
        let mut input = InputDat::read_path(&input_path)?;
        input.set_asymmetric(config.engine.boundary_mode == BoundaryMode::Asymmetric)?;
        input.write_path(&input_path)?;
        let base = input_path.parent().unwrap_or_else(|| Path::new("."));
        warnings.extend(input.check_directories(base));
        written.push(input_path);
    }

    tracing::info!(files = written.len(), "export complete");
    if json_mode {
        print_json(&serde_json::json!({
            "features": tables.specs.len(),
            "written": paths(&written),
            "warnings": warnings,
        }));
        return Ok(());
    }

    println!("Exported {} features", tables.specs.len());
    for path in &written {
        println!("Written: {}", path.display());
    }
    print_warnings(&warnings);
    Ok(())
}

// =============================================================================
// OPTIMIZER COMMANDS
// =============================================================================

/// Set or clear the asymmetric connectivity directive.
pub fn cmd_input_dat(json_mode: bool, file: &Path, asymmetric: bool) -> Result<(), ConplanError> {
    let mut input = InputDat::read_path(file)?;
    input.set_asymmetric(asymmetric)?;
    input.write_path(file)?;

    if json_mode {
        print_json(&serde_json::json!({
            "file": file.to_string_lossy(),
            "asymmetric": input.is_asymmetric(),
        }));
        return Ok(());
    }
    println!(
        "{}: asymmetric connectivity {}",
        file.display(),
        if input.is_asymmetric() { "on" } else { "off" }
    );
    Ok(())
}

/// Aggregate replicate solutions into a selection-frequency table.
pub fn cmd_frequency(json_mode: bool, input_dat: &Path, output: &Path) -> Result<(), ConplanError> {
    let input = InputDat::read_path(input_dat)?;
    let base = input_dat.parent().unwrap_or_else(|| Path::new("."));
    let frequency = load_output(&input, base, OutputSelection::Frequency)?;

    let mut table = Table::new(["planning_unit", "number"]);
    table.rows = frequency
        .iter()
        .map(|(id, n)| vec![id.to_string(), n.to_string()])
        .collect();
    validate_output_path(output)?;
    table.write_path(output)?;

    if json_mode {
        print_json(&serde_json::json!({
            "replicates": input.num_reps()?,
            "units": frequency.len(),
            "output": output.to_string_lossy(),
        }));
        return Ok(());
    }
    println!(
        "Selection frequency over {} replicates written to {}",
        input.num_reps()?,
        output.display()
    );
    Ok(())
}

/// Evaluate how much connectivity an optimizer solution retains.
pub fn cmd_posthoc(
    json_mode: bool,
    matrix: &Path,
    format: &str,
    input_dat: &Path,
    selection: &str,
    output: Option<&Path>,
) -> Result<(), ConplanError> {
    let format: MatrixFormat = format.parse()?;
    let which: OutputSelection = selection.parse()?;
    let data = read_connectivity(matrix, format)?.value;

    let input = InputDat::read_path(input_dat)?;
    let base = input_dat.parent().unwrap_or_else(|| Path::new("."));
    let solution = load_output(&input, base, which)?;

    let mut units: BTreeSet<_> = data.node_set();
    units.extend(solution.keys().copied());
    let rows = evaluate(&data, &units, &selected_units(&solution));
    let table = posthoc_table(&rows);

    if let Some(path) = output {
        validate_output_path(path)?;
        table.write_path(path)?;
    }

    if json_mode {
        print_json(&serde_json::json!({
            "selection": which.label(),
            "rows": rows,
        }));
        return Ok(());
    }

    println!("Post-hoc evaluation: {}", which.label());
    println!();
    table.write_to(std::io::stdout().lock())?;
    if let Some(path) = output {
        println!();
        println!("Written: {}", path.display());
    }
    Ok(())
}

/// Locate the optimizer executable.
pub fn cmd_check_optimizer(json_mode: bool, dir: &Path) -> Result<(), ConplanError> {
    let path = locate_optimizer(dir)?;
    if json_mode {
        print_json(&serde_json::json!({ "executable": path.to_string_lossy() }));
        return Ok(());
    }
    println!("Optimizer found: {}", path.display());
    Ok(())
}
