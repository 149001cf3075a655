//! Agents wired over a local transport, driven by a real clock authority.

mod common;

use std::time::Duration;

use common::{Grid, approx};
use vpp_agents::agents::asset::AssetOptions;
use vpp_agents::agents::{AssetAgent, FleetCoordinator, NetworkAgent};
use vpp_agents::devices::{ChargingStation, ConstantLoad};
use vpp_agents::sim::controller::ProportionalController;
use vpp_agents::sim::lifecycle::ComponentState;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn constant_leaves_sum_into_root_congestion() {
    let grid = Grid::new("main_network");
    let root = NetworkAgent::new(grid.core("main_network"), None).unwrap();
    assert!(root.is_root());
    let feeder_addr = common::address("feeder");
    let feeder = NetworkAgent::new(grid.core("feeder"), Some(&grid.root())).unwrap();
    assert!(!feeder.is_root());

    let mut assets = Vec::new();
    for (name, kw) in [("load_a", 1.0), ("load_b", 2.0), ("load_c", 3.0)] {
        let agent = AssetAgent::new(
            grid.core(name),
            Some(&feeder_addr),
            Box::new(ConstantLoad::new(kw)),
            AssetOptions::default(),
        )
        .unwrap();
        assets.push(agent.spawn());
    }
    let clock = grid.spawn_clock();
    let root = root.spawn();
    let feeder = feeder.spawn();

    let mut probe = grid.probe();
    probe.watch_congestion(grid.root());
    grid.set_rate(60.0);

    let reached = probe
        .pump_until(WAIT, |log| log.congestion.last().is_some_and(|&c| approx(c, 6.0)))
        .await;
    assert!(reached, "congestion log: {:?}", probe.seen.congestion);

    let mut infos = Vec::new();
    for handle in assets {
        infos.push(handle.stop().await.unwrap());
    }
    for info in &infos {
        assert_eq!(info.state, ComponentState::Stopped);
        assert_eq!(info.net_power_kw, 0.0);
    }
    let feeder_report = feeder.stop().await.unwrap();
    assert_eq!(feeder_report.children.len(), 3);
    assert_eq!(feeder_report.net_power_kw, 0.0);
    let root_report = root.stop().await.unwrap();
    assert!(root_report.is_root);
    assert_eq!(root_report.children, vec![feeder_addr]);
    assert!(root_report.samples.iter().any(|s| approx(s.net_power_kw, 6.0)));
    clock.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_child_leaves_no_contribution_at_the_root() {
    let grid = Grid::new("main_network");
    let root = NetworkAgent::new(grid.core("main_network"), None).unwrap();
    let load = AssetAgent::new(
        grid.core("load"),
        Some(&grid.root()),
        Box::new(ConstantLoad::new(4.0)),
        AssetOptions::default(),
    )
    .unwrap();
    let clock = grid.spawn_clock();
    let root = root.spawn();
    let load = load.spawn();

    let mut probe = grid.probe();
    probe.watch_congestion(grid.root());
    grid.set_rate(60.0);
    assert!(
        probe
            .pump_until(WAIT, |log| log.congestion.last().is_some_and(|&c| approx(c, 4.0)))
            .await
    );

    load.stop().await.unwrap();
    let zeroed = probe
        .pump_until(WAIT, |log| log.congestion.last().is_some_and(|&c| c == 0.0))
        .await;
    assert!(zeroed, "congestion log: {:?}", probe.seen.congestion);

    let root_report = root.stop().await.unwrap();
    assert_eq!(root_report.net_power_kw, 0.0);
    assert_eq!(root_report.congestion_kw, 0.0);
    assert_eq!(root_report.samples.last().map(|s| s.net_power_kw), Some(0.0));
    assert_eq!(root_report.children, vec![common::address("load")]);
    clock.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn coordinator_brings_congestion_to_zero() {
    let grid = Grid::new("main_network");
    let root = NetworkAgent::new(grid.core("main_network"), None).unwrap();
    let cpo_addr = common::address("cpo");
    let cpo = FleetCoordinator::new(grid.core("cpo"), ProportionalController::default());

    let station = AssetAgent::new(
        grid.core("cs_1"),
        Some(&grid.root()),
        Box::new(ChargingStation::with_window(10.0, 1.0, true, 0, 23)),
        AssetOptions {
            coordinator: Some(cpo_addr),
            ..AssetOptions::default()
        },
    )
    .unwrap();
    let generator = AssetAgent::new(
        grid.core("pv"),
        Some(&grid.root()),
        Box::new(ConstantLoad::new(-4.0)),
        AssetOptions::default(),
    )
    .unwrap();

    let clock = grid.spawn_clock();
    let root = root.spawn();
    let cpo = cpo.spawn();
    let station = station.spawn();
    let generator = generator.spawn();

    let mut probe = grid.probe();
    probe.watch_congestion(grid.root());
    grid.set_rate(1.0);

    let settled = probe
        .pump_until(WAIT, |log| {
            log.congestion.iter().any(|&c| c > 1.0)
                && log.congestion.last().is_some_and(|&c| c.abs() < 1e-6)
        })
        .await;
    assert!(settled, "congestion log: {:?}", probe.seen.congestion);

    let station_info = station.stop().await.unwrap();
    assert_eq!(station_info.kind, "chargingstation");
    let cpo_info = cpo.stop().await.unwrap();
    assert_eq!(cpo_info.kind, "cpo");
    assert_eq!(cpo_info.children, vec![common::address("cs_1")]);
    generator.stop().await.unwrap();
    root.stop().await.unwrap();
    clock.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn self_correcting_leaf_follows_congestion() {
    let grid = Grid::new("main_network");
    let root = NetworkAgent::new(grid.core("main_network"), None).unwrap();
    let station = AssetAgent::new(
        grid.core("cs_3"),
        Some(&grid.root()),
        Box::new(ChargingStation::with_window(10.0, 1.0, true, 0, 23)),
        AssetOptions {
            controller: Some(ProportionalController::new(0.5)),
            ..AssetOptions::default()
        },
    )
    .unwrap();
    let generator = AssetAgent::new(
        grid.core("wind"),
        Some(&grid.root()),
        Box::new(ConstantLoad::new(-6.0)),
        AssetOptions::default(),
    )
    .unwrap();

    let clock = grid.spawn_clock();
    let root = root.spawn();
    let station = station.spawn();
    let generator = generator.spawn();

    let mut probe = grid.probe();
    probe.watch_congestion(grid.root());
    grid.set_rate(1.0);

    let corrected = probe
        .pump_until(WAIT, |log| {
            log.congestion.iter().any(|&c| c > 1.0) && log.congestion.last().is_some_and(|&c| c.abs() < 0.5)
        })
        .await;
    assert!(corrected, "congestion log: {:?}", probe.seen.congestion);

    station.stop().await.unwrap();
    generator.stop().await.unwrap();
    root.stop().await.unwrap();
    clock.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_changes_keep_simulated_time_continuous() {
    let grid = Grid::new("main_network");
    let clock = grid.spawn_clock();
    let mut probe = grid.probe();
    probe.watch_time(grid.directory.time.clone());

    // initial sync: paused at the start
    assert!(probe.pump_until(WAIT, |log| !log.time.is_empty()).await);
    assert_eq!(probe.seen.time[0].rate.value, 0.0);
    assert_eq!(probe.seen.time[0].sim_broadcast_time.value, common::sim_start());

    grid.set_rate(3600.0);
    assert!(probe.pump_until(WAIT, |log| log.time.len() >= 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    grid.set_rate(0.0);
    assert!(probe.pump_until(WAIT, |log| log.time.len() >= 3).await);

    let anchors: Vec<_> = probe.seen.time.iter().map(|t| t.sim_broadcast_time.value).collect();
    assert!(anchors.windows(2).all(|w| w[0] <= w[1]), "anchors: {anchors:?}");
    assert!(anchors[2] > anchors[1]);
    assert_eq!(probe.seen.time[2].rate.value, 0.0);
    clock.stop().await.unwrap();
}
