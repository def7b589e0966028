//! Binary entrypoint that serves the conversation graph API.

use std::process::ExitCode;

use convo_graph::start_convo_graph;

/// Start the HTTP server with configuration read from `CONVO_GRAPH_*`.
fn main() -> ExitCode {
    start_convo_graph::run()
}
