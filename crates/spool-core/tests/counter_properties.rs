//! Counter invariants over arbitrary source sizes, chunk sizes and skip patterns

mod common;

use std::sync::Arc;

use common::{numbers_job, run_params, skip_every};
use proptest::prelude::*;
use spool_core::io::{IterSource, VecSink};
use spool_core::{BatchStatus, ChunkStep, InMemoryJobRepository, JobDefinition, JobLauncher, JobParameters};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_commit_count_is_chunk_ceiling(total in 0u32..600, chunk_size in 1usize..150) {
        let (step, batches) = runtime().block_on(async {
            let sink = VecSink::new();
            let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
            let job = numbers_job(total, chunk_size, sink.clone());
            let execution = launcher.launch(&job, run_params("2025-02-05")).await.unwrap();
            assert_eq!(execution.status, BatchStatus::Completed);
            (execution.step("load").cloned().unwrap(), sink.batch_sizes().await)
        });

        let expected_commits = (total as u64).div_ceil(chunk_size as u64);
        prop_assert_eq!(step.read_count, total as u64);
        prop_assert_eq!(step.write_count, total as u64);
        prop_assert_eq!(step.commit_count, expected_commits);
        prop_assert!(batches.iter().all(|size| *size <= chunk_size));
        prop_assert_eq!(batches.len() as u64, expected_commits);
    }

    #[test]
    fn prop_written_plus_skipped_equals_read(
        total in 0u32..400,
        chunk_size in 1usize..64,
        skip_modulus in 1u32..10,
    ) {
        let step = runtime().block_on(async {
            let sink = VecSink::<u32>::new();
            let handle = sink.clone();
            let step = ChunkStep::<u32, u32>::builder("filter")
                .chunk_size(chunk_size)
                .source(move |_: &JobParameters| Ok(IterSource::new(1..=total)))
                .transform(skip_every(skip_modulus))
                .sink(move |_: &JobParameters| Ok(handle.clone()))
                .build()
                .unwrap();
            let job = JobDefinition::new("filterJob").step(step);
            let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
            let execution = launcher.launch(&job, run_params("2025-02-05")).await.unwrap();
            execution.step("filter").cloned().unwrap()
        });

        prop_assert_eq!(step.read_count, total as u64);
        prop_assert_eq!(step.skip_count, (total / skip_modulus) as u64);
        prop_assert_eq!(step.write_count + step.skip_count, step.read_count);
        prop_assert!(step.commit_count <= (total as u64).div_ceil(chunk_size as u64));
    }
}
