use std::{cell::Cell, fmt};

use counted::{Handle, tracker, upcast};
use tracing_subscriber::EnvFilter;

trait Field: fmt::Debug + Send + Sync {
    fn norm(&self) -> f64;
}

#[derive(Debug, Clone)]
struct Patch {
    cells: Vec<f64>,
}

impl Field for Patch {
    fn norm(&self) -> f64 {
        self.cells.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("counted=debug")),
        )
        .init();

    // Two handles, one counter.
    let counter = Handle::new(Cell::new(5));
    let alias = counter.clone();
    alias.set(7);
    println!("counter = {}, refs = {}", counter.get().map_or(0, Cell::get), counter.ref_count());

    // A patch shared through its trait.
    let patch = Handle::new(Patch {
        cells: vec![3.0, 4.0],
    });
    let field: Handle<dyn Field> = upcast!(as dyn Field, patch);
    println!("{field:?} has norm {}", field.norm());

    // Copy on write.
    let mut private = field.downcast::<Patch>();
    private.make_mut().cells.push(12.0);
    println!("private norm {} vs shared norm {}", private.norm(), field.norm());

    // Something that must outlive all of its handles.
    let constants = Handle::new(Patch {
        cells: vec![1.0; 64],
    });
    constants.disown_deletion();
    drop(constants);

    println!("{}", tracker::MemoryReport::capture());
    tracker::log_report();
}
