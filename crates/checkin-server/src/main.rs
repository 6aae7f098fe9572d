//! Check-in server: accepts requests on the channel and forks a worker for each

use checkin_ipc::{Dispatcher, RecordStore};
use checkin_server::{init_logging, Opts};
use eyre::{Result, WrapErr};

fn main() -> Result<()> {
    init_logging();
    let opts = Opts::from_args()?;

    if let Some(count) = opts.seed {
        RecordStore::seed(&opts.config.database, count)
            .wrap_err("seeding the passenger database")?;
        tracing::info!(count, path = %opts.config.database.display(), "database seeded");
        return Ok(());
    }

    let dispatcher = Dispatcher::start(&opts.config).wrap_err("starting the server")?;
    dispatcher.run()
}
