//! Cross-engine integration tests exercising the seed test suite from
//! spec §8's "Concrete scenarios".

use std::time::Duration;

use faultkit::context::{CancellationManager, CancellationToken, ConcurrentTestConfig, PropagationConfig};
use faultkit::corruptor::{ArchiveCorruptor, CorruptionPlan, CorruptionType};
use faultkit::diskspace::{ExhaustionMode, VirtualDisk};
use faultkit::orchestrator::{Phase, Scenario, ScenarioOrchestrator, Step, StepError, StepStatus};
use faultkit::permission::PermissionSandbox;

#[test]
fn context_propagation_depth_completes_within_deadline() {
    // spec §8 scenario 4: chain_depth=5, propagation_delay=20ms, deadline=200ms.
    let manager = CancellationManager::new();
    let config = PropagationConfig {
        chain_depth: 5,
        propagation_delay: Duration::from_millis(20),
        token: CancellationToken::new(),
    };
    let records = manager.test_propagation(&config);
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| !r.propagated));
}

#[test]
fn scheduled_cancellation_reaches_the_chain() {
    // spec §8 scenario 5: chain_depth=5, propagation_delay=100ms, a token
    // cancelled at 5ms should short-circuit well before the chain unwinds.
    let manager = CancellationManager::new();
    let token = CancellationToken::new();
    token.cancel();
    let config = PropagationConfig {
        chain_depth: 5,
        propagation_delay: Duration::from_millis(100),
        token,
    };
    let records = manager.test_propagation(&config);
    assert_eq!(records.len(), 1);
    assert!(records[0].propagated);
}

#[test]
fn concurrent_test_bounds_fan_out_and_reports_cancellation() {
    let manager = CancellationManager::new();
    let config = ConcurrentTestConfig {
        num_operations: 6,
        max_concurrency: 2,
        stagger: Some(Duration::from_millis(5)),
        per_operation_deadline: None,
        scheduled_cancellation: Some(Duration::from_millis(1)),
        token: CancellationToken::new(),
    };
    let report = manager.run_concurrent_test(&config, |_index, token| faultkit::context::OperationOutcome {
        error: None,
        cancelled: token.is_cancelled(),
    });
    assert_eq!(report.records.len(), 6);
    assert!(report.cancelled_count >= 1);
}

#[test]
fn gradual_exhaustion_fails_around_the_tenth_write() {
    // spec §8 scenario 1.
    const MIB: u64 = 1024 * 1024;
    let disk = VirtualDisk::new(20 * MIB, 7);
    disk.reset();
    disk.set_exhaustion(ExhaustionMode::Linear, 0.1);

    let mut exhausted_at = None;
    for i in 1..=15 {
        if disk.check_space_and_inject("write", "/data", 1024).is_err() {
            exhausted_at = Some(i);
            break;
        }
    }
    assert!(exhausted_at.is_some());
    assert_eq!(disk.available(), 0);
    assert!(disk.stats().space_exhausted >= 1);
    assert!(disk.stats().failed_writes >= 1);
}

#[test]
fn permission_denial_round_trip() {
    // spec §8 scenario 3.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let sandbox = PermissionSandbox::new().unwrap();
        let path = sandbox.create_file("test.txt", b"hello", 0o644).unwrap();
        sandbox.set_permission(&path, 0o000).unwrap();

        let write_attempt = std::fs::OpenOptions::new().append(true).open(&path);
        if write_attempt.is_err() && unsafe { libc::geteuid() } != 0 {
            assert!(faultkit::permission::is_permission_error(&write_attempt.unwrap_err()));
        }

        sandbox.restore().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);
    }
}

#[test]
fn crc_corruption_is_byte_identical_across_two_archives_with_the_same_seed() {
    // spec §8 scenario 2.
    use std::io::Write;
    let dir = tempfile::tempdir().unwrap();

    let build = |name: &str| {
        let path = dir.path().join(name);
        let contents = b"payload bytes for reproducibility";
        let crc = crc32fast::hash(contents);
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(b"f.txt");
        buf.extend_from_slice(contents);
        buf.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&0u16.to_le_bytes());
        std::fs::File::create(&path).unwrap().write_all(&buf).unwrap();
        path
    };

    let a = build("a.zip");
    let b = build("b.zip");

    let corruptor = ArchiveCorruptor::new();
    let result_a = corruptor.apply(&CorruptionPlan::new(&a, CorruptionType::Crc).with_seed(99999)).unwrap();
    let result_b = corruptor.apply(&CorruptionPlan::new(&b, CorruptionType::Crc).with_seed(99999)).unwrap();

    assert_eq!(result_a.new_bytes, result_b.new_bytes);
    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

#[test]
fn scenario_combining_disk_and_permission_engines_through_the_orchestrator() {
    let orchestrator = ScenarioOrchestrator::new();

    let scenario = Scenario::new("disk-and-permissions", "combined", Duration::from_secs(5))
        .with_step(Step::new("allocate-disk", "allocate-disk", Phase::Setup, |runtime| {
            let disk = runtime.ensure_disk(1024 * 1024, 11);
            disk.set_exhaustion(faultkit::diskspace::ExhaustionMode::Immediate, 1.0);
            Ok(())
        }))
        .with_step(Step::new("exhaust", "exhaust", Phase::Execution, |runtime| {
            let disk = runtime.disk().expect("disk allocated in setup");
            match disk.check_space_and_inject("write", "/data/archive.zip", 1) {
                Err(_) => Ok(()),
                Ok(()) => Err(StepError::new("expected immediate exhaustion to fail the write")),
            }
        }))
        .with_step(
            Step::new("sandbox-permissions", "sandbox-permissions", Phase::Verification, |runtime| {
                let sandbox = runtime.ensure_permission_sandbox().map_err(StepError::from)?;
                let path = sandbox
                    .create_file("locked.txt", b"secret", 0o644)
                    .map_err(|e| StepError::new(e.to_string()))?;
                sandbox.set_permission(&path, 0o000).map_err(|e| StepError::new(e.to_string()))?;
                runtime.shared.insert("locked_path", path);
                Ok(())
            }),
        )
        .with_step(Step::new("cleanup", "cleanup", Phase::Cleanup, |runtime| {
            if let Some(sandbox) = runtime.permission_sandbox() {
                sandbox.restore().map_err(|e| StepError::new(e.to_string()))?;
            }
            Ok(())
        }));

    orchestrator.register_scenario(scenario).unwrap();
    let execution = orchestrator.execute_scenario("disk-and-permissions", 11).unwrap();

    assert!(execution.success, "execution should succeed: {:?}", execution.step_results);
    assert_eq!(execution.step_results["exhaust"].status, StepStatus::Succeeded);
    assert_eq!(execution.steps_skipped, 0);
}
