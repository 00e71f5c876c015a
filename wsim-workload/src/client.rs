// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Run prepared clients, one thread each.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use wsim_engine::sim_error;
use wsim_engine::types::SimError;
use wsim_track::entity::Entity;
use wsim_track::{debug, error};

use crate::prepare::ClientWorkload;
use crate::runner::ClientStats;

type ClientThread = JoinHandle<Result<ClientStats, SimError>>;

/// Run every client on its own thread and collect their statistics in
/// client order.
///
/// If one client is the master it is joined first and the others are then
/// asked to stop before being joined. Every client is joined even if one
/// fails, after which the first failure is returned.
pub fn run_clients(
    entity: &Arc<Entity>,
    clients: Vec<ClientWorkload>,
) -> Result<Vec<ClientStats>, SimError> {
    let stop = Arc::new(AtomicBool::new(false));
    let master = clients.iter().position(ClientWorkload::is_master);

    let mut threads = Vec::with_capacity(clients.len());
    for mut client in clients {
        let client_stop = stop.clone();
        let id = client.id;
        let spawned = thread::Builder::new()
            .name(format!("client{id}"))
            .spawn(move || client.run(&client_stop));
        match spawned {
            Ok(thread) => threads.push((id, Some(thread))),
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                join_all(entity, threads);
                return sim_error!(format!("Failed to start client {id}: {e}"));
            }
        }
    }

    let mut results: Vec<Option<Result<ClientStats, SimError>>> =
        threads.iter().map(|_| None).collect();
    if let Some(master) = master {
        let (id, thread) = &mut threads[master];
        if let Some(thread) = thread.take() {
            results[master] = Some(join(*id, thread));
            debug!(entity ; "master client {id} finished");
        }
        stop.store(true, Ordering::Relaxed);
    }

    for (i, (id, thread)) in threads.iter_mut().enumerate() {
        if let Some(thread) = thread.take() {
            results[i] = Some(join(*id, thread));
        }
    }

    let mut stats = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results.into_iter().flatten() {
        match result {
            Ok(client_stats) => stats.push(client_stats),
            Err(e) => {
                error!(entity ; "{e}");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

fn join(id: usize, thread: ClientThread) -> Result<ClientStats, SimError> {
    match thread.join() {
        Ok(result) => result,
        Err(_) => sim_error!(format!("Client {id} panicked!")),
    }
}

fn join_all(entity: &Arc<Entity>, threads: Vec<(usize, Option<ClientThread>)>) {
    for (id, thread) in threads {
        if let Some(Err(e)) = thread.map(|thread| join(id, thread)) {
            error!(entity ; "{e}");
        }
    }
}
