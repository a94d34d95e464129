#[macro_use]
extern crate anyhow;
extern crate raft_kv_core;
#[macro_use]
extern crate scopeguard;

use rand::{thread_rng, Rng};

mod config;

#[test]
fn initial_election() -> config::Result<()> {
    const SERVERS: usize = 3;
    let cfg = config::make_config(SERVERS, false);
    defer!(cfg.cleanup());

    cfg.begin("Test: initial election");

    cfg.check_one_leader()?;

    config::sleep_millis(50);

    let first_term = cfg.check_terms()?;
    config::sleep_election_timeouts(2);

    let second_term = cfg.check_terms()?;

    if first_term != second_term {
        eprintln!("Warning: term change even though there were no failures");
    }

    cfg.check_one_leader()?;

    cfg.end();
    Ok(())
}

#[test]
fn re_election() -> config::Result<()> {
    const SERVERS: usize = 3;
    let cfg = config::make_config(SERVERS, false);
    defer!(cfg.cleanup());

    cfg.begin("Test: election after network failure");

    let leader_one = cfg.check_one_leader()?;

    cfg.disconnect(leader_one);
    cfg.check_one_leader()?;

    cfg.connect(leader_one);

    let leader_two = cfg.check_one_leader()?;
    let other = (leader_two + 1) % SERVERS;

    cfg.disconnect(leader_two);
    cfg.disconnect(other);
    config::sleep_election_timeouts(1);
    cfg.check_no_leader()?;

    cfg.connect(other);
    cfg.check_one_leader()?;

    cfg.connect(leader_two);
    cfg.check_one_leader()?;

    cfg.end();
    Ok(())
}

#[test]
fn many_elections() -> config::Result<()> {
    const SERVERS: usize = 7;
    const ITERS: usize = 10;
    let cfg = config::make_config(SERVERS, false);
    defer!(cfg.cleanup());

    cfg.begin("Test: multiple elections");

    cfg.check_one_leader()?;

    for _ in 0..ITERS {
        let i1 = thread_rng().gen_range(0..SERVERS);
        let i2 = thread_rng().gen_range(0..SERVERS);
        let i3 = thread_rng().gen_range(0..SERVERS);
        cfg.disconnect(i1);
        cfg.disconnect(i2);
        cfg.disconnect(i3);

        // Either the current leader should be alive, or the remaining four
        // should elect a new one.
        cfg.check_one_leader()?;

        cfg.connect(i1);
        cfg.connect(i2);
        cfg.connect(i3);
    }

    cfg.check_one_leader()?;

    cfg.end();
    Ok(())
}

#[test]
fn leader_steps_down_after_partition_heals() -> config::Result<()> {
    const SERVERS: usize = 5;
    let cfg = config::make_config(SERVERS, false);
    defer!(cfg.cleanup());

    cfg.begin("Test: a stale leader steps down when it hears a newer term");

    let old_leader = cfg.check_one_leader()?;
    let (old_term, _) = cfg
        .raft(old_leader)
        .map(|raft| raft.get_state())
        .ok_or_else(|| anyhow!("leader {} is not running", old_leader))?;

    cfg.disconnect(old_leader);
    let new_leader = cfg.check_one_leader()?;
    ensure!(new_leader != old_leader, "the old leader is still the leader");

    // Cut off from everyone, the old leader keeps believing it leads.
    let (term, is_leader) = cfg
        .raft(old_leader)
        .map(|raft| raft.get_state())
        .ok_or_else(|| anyhow!("server {} is not running", old_leader))?;
    ensure!(is_leader && term == old_term, "the old leader changed on its own");

    cfg.connect(old_leader);
    cfg.check_one_leader()?;
    config::sleep_election_timeouts(1);

    let (term, is_leader) = cfg
        .raft(old_leader)
        .map(|raft| raft.get_state())
        .ok_or_else(|| anyhow!("server {} is not running", old_leader))?;
    ensure!(!is_leader, "two leaders after the partition healed");
    ensure!(term > old_term, "the old leader did not move to a newer term");
    cfg.check_terms()?;

    cfg.end();
    Ok(())
}
