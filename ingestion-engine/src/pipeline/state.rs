use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Pending,
    states: [Pending, Classified, Profiled, Vectorized, Enriched, Persisted, Failed],
    events {
        classify { transition: { from: Pending, to: Classified } }
        profile { transition: { from: Classified, to: Profiled } }
        vectorize { transition: { from: Classified, to: Vectorized } }
        enrich {
            transition: { from: Profiled, to: Enriched }
            transition: { from: Vectorized, to: Enriched }
        }
        persist { transition: { from: Enriched, to: Persisted } }
        abort {
            transition: { from: Pending, to: Failed }
            transition: { from: Classified, to: Failed }
            transition: { from: Profiled, to: Failed }
            transition: { from: Vectorized, to: Failed }
            transition: { from: Enriched, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn pending() -> IngestionMachine<(), Pending> {
    IngestionMachine::new(())
}
