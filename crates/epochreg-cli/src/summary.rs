use console::Style;
use epochreg_core::exposure::Exposure;
use epochreg_core::pipeline::config::{CombinationPolicy, PipelineConfig};
use epochreg_core::pipeline::{RunSummary, Stage};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    failed: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            failed: Style::new().red().bold(),
        }
    }
}

fn rule(len: usize) -> String {
    "\u{2550}".repeat(len)
}

fn list_or_all<T: ToString>(items: &[T]) -> String {
    if items.is_empty() {
        "all".to_string()
    } else {
        items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub fn print_run_header(config: &PipelineConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("EpochReg Pipeline"));
    println!("  {}", s.title.apply_to(rule(17)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Root"),
        s.value.apply_to(&config.root)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Directory"),
        s.path.apply_to(config.top_dir.display())
    );
    let stages: Vec<String> = Stage::ALL
        .iter()
        .filter(|stage| config.stages.enabled(**stage))
        .map(ToString::to_string)
        .collect();
    if stages.is_empty() {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Stages"),
            s.disabled.apply_to("none")
        );
    } else {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Stages"),
            s.method.apply_to(stages.join(" > "))
        );
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Clobber"),
        s.value.apply_to(config.clobber)
    );
    println!();

    println!("  {}", s.header.apply_to("Selection"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Filters"),
        s.value.apply_to(list_or_all(&config.only_filters))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Epochs"),
        s.value.apply_to(list_or_all(&config.only_epochs))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Span"),
        s.value.apply_to(format!("{} d", config.epochs.span_days))
    );
    if let Some(target) = config.target {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Target"),
            s.value.apply_to(target)
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Registration"));
    if config.single_star {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Anchor"),
            s.method.apply_to("single star")
        );
    } else if let Some(image) = &config.reference.image {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Reference"),
            s.path.apply_to(image.display())
        );
    } else {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Reference"),
            s.method.apply_to("built from the deepest visit")
        );
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Fit"),
        s.method.apply_to(if config.registration.shift_only {
            "shift"
        } else {
            "rotation+scale"
        })
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Min objects"),
        s.value.apply_to(config.registration.min_objects)
    );
    println!();

    println!("  {}", s.header.apply_to("Combination"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("CR mode"),
        s.value.apply_to(config.combine.cr_mode)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Weights"),
        s.value.apply_to(config.combine.weight_type)
    );
    match &config.combination {
        CombinationPolicy::None => println!(
            "    {:<12}{}",
            s.label.apply_to("Filters"),
            s.disabled.apply_to("separate")
        ),
        CombinationPolicy::Avg { name, filters } => println!(
            "    {:<12}{}",
            s.label.apply_to("Filters"),
            s.method
                .apply_to(format!("{name} = avg({})", filters.join(",")))
        ),
        CombinationPolicy::Driz { name, filters } => println!(
            "    {:<12}{}",
            s.label.apply_to("Filters"),
            s.method
                .apply_to(format!("{name} = driz({})", filters.join(",")))
        ),
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Template"),
        s.value
            .apply_to(format!("e{:02}", config.difference.template_epoch))
    );
    println!();
}

pub fn print_run_summary(summary: &RunSummary) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Summary"));
    println!("  {}", s.title.apply_to(rule(7)));
    println!();
    println!(
        "  {:<16}{}",
        s.label.apply_to("Exposures"),
        s.value.apply_to(summary.exposures)
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Epochs"),
        s.value.apply_to(list_or_all(&summary.epochs))
    );
    if let Some(reference) = &summary.reference {
        println!(
            "  {:<16}{} ({})",
            s.label.apply_to("Reference"),
            s.path.apply_to(reference.image.display()),
            reference.source
        );
    }
    println!();

    for (stage, report) in &summary.stages {
        let failed = if report.failed.is_empty() {
            s.label.apply_to(format!("{} failed", report.failed.len()))
        } else {
            s.failed.apply_to(format!("{} failed", report.failed.len()))
        };
        println!(
            "  {:<16}{} run, {} skipped, {}",
            s.header.apply_to(stage),
            s.value.apply_to(report.executed.len()),
            s.value.apply_to(report.skipped.len()),
            failed
        );
        for failure in &report.failed {
            println!(
                "    {} {}",
                s.failed.apply_to(&failure.unit),
                s.label.apply_to(&failure.reason)
            );
        }
    }

    if !summary.composites.is_empty() {
        println!();
        println!("  {}", s.header.apply_to("Composites"));
        for path in &summary.composites {
            println!("    {}", s.path.apply_to(path.display()));
        }
    }
    println!();
}

pub fn print_epoch_table(exposures: &[Exposure]) {
    let s = Styles::new();

    println!(
        "  {}",
        s.header.apply_to(format!(
            "{:<24}{:<8}{:<12}{:<14}{:>6}{:>12}{:>4}",
            "File", "Filter", "Camera", "Visit", "Epoch", "MJD", "On"
        ))
    );
    for e in exposures {
        let row = format!(
            "{:<24}{:<8}{:<12}{:<14}{:>6}{:>12.4}{:>4}",
            e.filename,
            e.filter,
            e.camera.tag(),
            e.pidvisit,
            e.epoch,
            e.mjd,
            if e.on_target { "y" } else { "n" }
        );
        if e.is_active() {
            println!("  {}", s.value.apply_to(row));
        } else {
            println!("  {}", s.disabled.apply_to(row));
        }
    }
}
