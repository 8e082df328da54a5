mod cli;
mod commands;
mod constants;
mod error;
mod logging;
mod models;
mod services;
mod utils;

fn main() {
    cli::run();
}
