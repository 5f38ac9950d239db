//! Replays the scenario files shipped in `scenarios/`

use nodestake_node::{NodeConfig, Scenario, StakeNode};
use nodestake_staking::{ErrorKind, StakingEvent};
use std::path::PathBuf;

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../scenarios")
        .join(name)
}

#[test]
fn node_staking_walkthrough_passes() {
    let scenario = Scenario::load(scenario_path("node_staking.toml")).unwrap();
    let node = StakeNode::new(NodeConfig::default()).unwrap();

    let report = node.run_scenario(&scenario).unwrap();
    assert_eq!(report.steps_run, scenario.steps.len());
    assert_eq!(report.expected_failures, 4);
    assert_eq!(report.final_block, 5761);

    let rejected: Vec<ErrorKind> = report
        .events
        .iter()
        .filter_map(|event| match event {
            StakingEvent::Rejected { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        rejected,
        vec![
            ErrorKind::Unauthorized,
            ErrorKind::WithdrawCooldownActive,
            ErrorKind::InsufficientStake,
            ErrorKind::UndercollateralizedWithdraw,
        ]
    );

    assert!(matches!(report.events.last(), Some(StakingEvent::NodeDeregistered { .. })));
    assert_eq!(node.engine().statistics().total_staked, 0);
}
