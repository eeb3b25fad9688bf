/*!
 # Dev Server Runner

 A Rust library for launching, supervising and stopping a local App Engine
 development server on behalf of an IDE-like host.

 ## Overview

 Dev Server Runner provides functionality to:
 - Turn a server definition and a bound SDK into a launch specification
   (program arguments, VM arguments, classpath)
 - Check that the server's ports are free before launching
 - Launch the dev server process through a host launch facility
 - Probe the server URL in the background until it answers
 - React to the process exiting on its own
 - Stop the server deterministically, exactly once, however many stop
   requests race
 - Persist the module → publish location mapping

 ## Basic Usage

 ```no_run
 use devserver_runner::{Config, ServerController, ServerState};
 use devserver_runner::host::{LaunchMode, ProcessLauncher};
 use devserver_runner::prober::HttpProbe;
 use std::sync::Arc;

 #[tokio::main]
 async fn main() -> devserver_runner::Result<()> {
     let config = Config::from_file("devserver.json")?;
     let probe = Arc::new(HttpProbe::new(config.prober.request_timeout)?);
     let controller = ServerController::new(config, Arc::new(ProcessLauncher::new()), probe)?;

     controller.start(LaunchMode::Run).await?;

     let mut states = controller.subscribe_state();
     let _ = states.wait_for(|s| *s == ServerState::Started).await;
     println!("Dev server is up");

     controller.stop(false);
     Ok(())
 }
 ```

 ## State machine

 ```text
 Stopped  --start()--------------------------> Starting
 Starting --probe answered------------------> Started
 Starting --launch failed / probe gave up---> Stopped
 Starting|Started --terminated / stop()-----> Stopping --> Stopped
 ```

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod launch;
pub mod ports;
pub mod prober;
pub mod publish;

pub use config::Config;
pub use controller::{PublishKind, PublishState, ServerController, ServerId, ServerState};
pub use error::{Error, Result};
pub use launch::LaunchSpec;
pub use publish::PublishLocations;
