use anyhow::Result;
use clap::Args;
use xshell::{Shell, cmd};

#[derive(Args)]
pub struct Build {
    #[arg(long, default_value = "dev")]
    profile: String,

    /// Only build this package (e.g. `gantry-core`)
    #[arg(long, short)]
    package: Option<String>,
}

impl Build {
    pub fn run(&self, sh: &Shell) -> Result<()> {
        let profile = &self.profile;
        let package = self.package.iter().flat_map(|p| ["--package", p.as_str()]);
        cmd!(sh, "cargo build --profile {profile} {package...}").run()?;
        Ok(())
    }
}
