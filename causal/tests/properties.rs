use causal::sim::{FaultConfig, FaultPreset, Simulation};
use causal::{ClockModel, ConfigBuilder, EngineConfig};

const SEEDS: [u64; 8] = [1, 2, 3, 5, 8, 13, 21, 34];

#[test]
fn safety_holds_for_every_model_and_fault_preset() -> anyhow::Result<()> {
    for model in ClockModel::ALL {
        for preset in FaultPreset::ALL {
            for seed in SEEDS {
                let config = EngineConfig::with_model(model);
                let mut sim = Simulation::new(config, preset.config(), seed)?;
                let report = sim.run(60)?;

                assert!(
                    report.passed(),
                    "{model} / {preset} / seed {seed}: {:?}",
                    report.check.error_message()
                );
            }
        }
    }

    Ok(())
}

#[test]
fn partial_update_delivers_everything_over_lossless_network() -> anyhow::Result<()> {
    for seed in SEEDS {
        let mut sim = Simulation::new(EngineConfig::default(), FaultConfig::reordering(), seed)?;
        let report = sim.run(100)?;

        assert!(report.liveness_checked);
        assert!(report.passed(), "seed {seed}: {:?}", report.check.error_message());
        assert_eq!(report.engine.pending, 0);
        for (_, history) in &report.histories {
            assert!(!history.is_empty());
        }
    }

    Ok(())
}

#[test]
fn duplicates_never_enter_history_twice() -> anyhow::Result<()> {
    let faults = FaultConfig::reordering().with_duplicate(1.0);
    let mut sim = Simulation::new(EngineConfig::with_model(ClockModel::Matrix), faults, 99)?;
    let report = sim.run(40)?;

    assert!(report.passed(), "{:?}", report.check.error_message());
    assert_eq!(report.network.messages_duplicated, 80);
    for (process, history) in &report.histories {
        let mut unique = history.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), history.len(), "{process}");
    }

    Ok(())
}

#[test]
fn wider_membership() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .processes(["a", "b", "c", "d", "e"])
        .model(ClockModel::VectorPartial)
        .build()?;
    let mut sim = Simulation::new(config, FaultConfig::reordering(), 17)?;
    let report = sim.run(80)?;

    assert!(report.passed(), "{:?}", report.check.error_message());
    assert_eq!(report.histories.len(), 5);
    assert_eq!(report.engine.delivered, 80 * 4);

    Ok(())
}
