use anyhow::Result;
use clap::Args;
use xshell::{Shell, cmd};

#[derive(Args)]
pub struct Test {
    #[arg(long, default_value = "dev")]
    profile: String,

    /// Accept changed insta snapshots instead of failing on them
    #[arg(long)]
    accept: bool,

    /// Test name filter passed through to cargo test
    filter: Option<String>,
}

impl Test {
    pub fn run(&self, sh: &Shell) -> Result<()> {
        let _env = self
            .accept
            .then(|| sh.push_env("INSTA_UPDATE", "always"));
        let profile = &self.profile;
        let filter = &self.filter;
        cmd!(sh, "cargo test --workspace --profile {profile} {filter...}").run()?;
        Ok(())
    }
}
