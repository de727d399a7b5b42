use clap::Parser;
use flatfs::cli_interface::FlatFsCli;
/// a CLI to either create a fresh volume image,
/// or replay a command file against one.
///
/// The latter mounts nothing by itself; the command file's `M` command
/// picks the image to operate on.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = FlatFsCli::parse();
    match args {
        FlatFsCli::Mkfs(args) => {
            // create a new volume image
            flatfs::mkfs::mkfs(args.image_file_path)?;
        }
        FlatFsCli::Run(args) => {
            // feed the command file to the engine, one line at a time
            flatfs::runner::run_commands(args.command_file)?;
        }
    }
    Ok(())
}
