use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Command {
    #[clap(subcommand)]
    pub action: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum SubCommand {
    Run(run::Command),
    Resync(resync::Command),
    SyncOne(sync_one::Command),
    DeleteOne(delete_one::Command),
    DeleteMany(delete_many::Command),
    Reconcile(reconcile::Command),
}

#[derive(Clone, Debug, Default, serde::Deserialize, clap::Args)]
pub struct ConfigOptions {
    #[clap(long, help = "config file path")]
    pub config_file: String,
}

impl ConfigOptions {
    pub fn read_config_from_file(&self) -> crate::errors::Result<crate::config::Configuration> {
        log::debug!("Reading configuration from file: {}", self.config_file);

        let config_content = std::fs::read_to_string(&self.config_file)?;

        match serde_json::from_str(&config_content) {
            Ok(config) => {
                log::info!(
                    "Successfully loaded configuration from {}",
                    self.config_file
                );
                Ok(config)
            }
            Err(error) => Err(crate::errors::Errors::ConfigReadError(format!(
                "Failed to parse configuration file: {}",
                error
            ))),
        }
    }
}

pub mod run {
    use clap::Args;

    #[derive(Clone, Debug, Args)]
    #[clap(name = "run", about = "Run the sync loop until interrupted")]
    pub struct Command {
        #[clap(flatten)]
        pub value: super::ConfigOptions,
    }
}

pub mod resync {
    use clap::Args;

    #[derive(Clone, Debug, Args)]
    #[clap(name = "resync", about = "Re-index every live post once")]
    pub struct Command {
        #[clap(flatten)]
        pub value: super::ConfigOptions,
    }
}

pub mod sync_one {
    use clap::Args;

    #[derive(Clone, Debug, Args)]
    #[clap(name = "sync-one", about = "Re-index a single post")]
    pub struct Command {
        #[clap(flatten)]
        pub value: super::ConfigOptions,

        #[clap(long, help = "post id")]
        pub id: i64,
    }
}

pub mod delete_one {
    use clap::Args;

    #[derive(Clone, Debug, Args)]
    #[clap(name = "delete-one", about = "Remove a single post from the index")]
    pub struct Command {
        #[clap(flatten)]
        pub value: super::ConfigOptions,

        #[clap(long, help = "post id")]
        pub id: i64,
    }
}

pub mod delete_many {
    use clap::Args;

    #[derive(Clone, Debug, Args)]
    #[clap(name = "delete-many", about = "Remove several posts from the index")]
    pub struct Command {
        #[clap(flatten)]
        pub value: super::ConfigOptions,

        #[clap(
            long,
            value_delimiter = ',',
            num_args = 1..,
            required = true,
            help = "comma separated post ids"
        )]
        pub ids: Vec<i64>,
    }
}

pub mod reconcile {
    use clap::Args;

    #[derive(Clone, Debug, Args)]
    #[clap(
        name = "reconcile",
        about = "Index or remove one record depending on its source row"
    )]
    pub struct Command {
        #[clap(flatten)]
        pub value: super::ConfigOptions,

        #[clap(long, help = "source table name")]
        pub table: String,

        #[clap(long, help = "record id")]
        pub id: i64,
    }
}
