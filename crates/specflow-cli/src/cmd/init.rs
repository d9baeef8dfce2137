use anyhow::Context;
use specflow_core::{paths, types::Category, workspace::Workspace};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing specflow in: {}", root.display());

    let written = Workspace::init(root).context("failed to initialize .specflow")?;
    for category in Category::all() {
        let dir = paths::category_dir(root, *category);
        println!("  ready:   {}", relative(root, &dir));
    }
    if written {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }
    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
