mod aggregate;
mod alert;
mod dto;
mod feed;
mod notify;
mod simulator;
mod store;
mod template;
mod util;
mod web_interface;

use sqlx::SqlitePool;
use std::future::Future;
use std::{env, process::exit};
use tokio::sync::oneshot::{self, error::RecvError, Receiver};
use tracing::{error, info};
use util::{config::get_config, connect_to_db, setup_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let args: Vec<String> = env::args().collect();
    let choice = args.get(1).cloned().unwrap_or("all".into());

    match choice.as_str() {
        "all" => {
            let http_addr = get_config().get_string("http_addr")?;
            let pool = connect_to_db().await?;
            info!("Starting gridwatch pipeline");

            let simulator_channel = start_task(simulator::start_devices());
            let alert_channel = start_task(alert::start_server());
            let store_channel = start_task(store::start_server(pool.clone()));
            let web_channel = start_task(web_interface::start_server(pool, http_addr));

            tokio::select! {
                res = simulator_channel => handle_nested_result(res),
                res = alert_channel => handle_nested_result(res),
                res = store_channel => handle_nested_result(res),
                res = web_channel => handle_nested_result(res),
            }
        }
        "simulator" => handle_result(simulator::start_devices().await),
        "alert" => handle_result(alert::start_server().await),
        "store" => {
            let pool = connect_to_db().await?;
            handle_result(store::start_server(pool).await)
        }
        "web" => {
            let http_addr = get_config().get_string("http_addr")?;
            let pool = connect_to_db().await?;
            handle_result(web_interface::start_server(pool, http_addr).await)
        }
        _ => println!("Make a valid choice (all, simulator, alert, store, web)"),
    }

    Ok(())
}

fn handle_nested_result(res: Result<anyhow::Result<()>, RecvError>) {
    match res {
        Err(err) => {
            error!("An internal error occurred: {:?}", err);
            exit(2)
        }
        Ok(nested) => handle_result(nested),
    }
}

fn handle_result(res: anyhow::Result<()>) {
    if let Err(err) = res {
        error!("An error occurred: {:?}", err);
        exit(1)
    }
}

fn start_task<F>(task: F) -> Receiver<anyhow::Result<()>>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel::<anyhow::Result<()>>();
    tokio::spawn(async move {
        let _ = sender.send(task.await);
    });
    receiver
}
