use std::path::PathBuf;

fn config_path(args: &[String]) -> Option<PathBuf> {
    if let Some(arg) = args.iter().find(|a| a.starts_with("--config=")) {
        return arg
            .split_once('=')
            .map(|(_, v)| PathBuf::from(v))
            .filter(|p| !p.as_os_str().is_empty());
    }
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config = config_path(&args);

    // Effective configuration (defaults + files + SETUP_WIZARD__* env) as TOML.
    if args.iter().any(|a| a == "--print-config") {
        school_setup_wizard::print_config(config);
        return;
    }

    // Non-interactive engine run against an in-memory store and the dry-run backend.
    // Prints the event transcript and exits 0/1.
    if args.iter().any(|a| a == "--install-smoke") {
        school_setup_wizard::run_install_smoke(config);
        return;
    }

    // Non-interactive TUI smoke test mode (for automated checks).
    // Renders a single frame for a specific page and exits 0.
    // Usage: --tui-smoke or --tui-smoke=welcome|database|school|admin|installing|complete
    if let Some(arg) = args
        .iter()
        .find(|a| a.as_str() == "--tui-smoke" || a.starts_with("--tui-smoke="))
    {
        let target = arg
            .split_once('=')
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.trim().is_empty());
        school_setup_wizard::run_tui_smoke(target, config);
        return;
    }

    // Default (and --tui): interactive terminal wizard.
    school_setup_wizard::run_tui(config);
}
