use clap::Parser;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum FlatFsCli {
    /// create a new volume image
    Mkfs(MkfsArgs),
    /// run a command file against a volume
    Run(RunArgs),
}

/// make a new volume image subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new volume image")]
pub struct MkfsArgs {
    /// the path of the volume image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
}

/// run a command file subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "run a command file")]
pub struct RunArgs {
    /// the path of the command input file
    #[clap(short = 'f', long)]
    pub command_file: String,
}
