//! Parallel execution: worker bounds and publication of aggregated items.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use buildchain_lib::prelude::*;

use super::common::*;

const PRODUCERS: usize = 16;

fn contribution_chain() -> BuildChain {
  build(|b| {
    for n in 0..PRODUCERS {
      b.add_step(
        BuildStep::new(format!("contribute-{n}"))
          .produces::<Contribution>()
          .run(move |ctx| {
            std::thread::sleep(Duration::from_millis((n % 3) as u64));
            ctx.produce(Contribution(n))?;
            Ok(())
          }),
      );
    }
    b.add_step(
      BuildStep::new("collect")
        .consumes::<Contribution>()
        .produces::<Compiled>()
        .run(|ctx| {
          let count = ctx.consume_all::<Contribution>()?.len();
          ctx.produce(Compiled(count))?;
          Ok(())
        }),
    );
  })
  .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consumer_sees_every_contribution() {
  let chain = contribution_chain();

  for _ in 0..10 {
    let result = chain.execute(Seeds::new(), &config(8)).await.unwrap();
    assert_eq!(result.get::<Compiled>(), Some(&Compiled(PRODUCERS)));

    let mut values: Vec<usize> = result.get_all::<Contribution>().iter().map(|c| c.0).collect();
    values.sort_unstable();
    assert_eq!(values, (0..PRODUCERS).collect::<Vec<_>>());
  }
}

#[tokio::test]
async fn parallelism_bounds_running_steps() {
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let chain = build(|b| {
    for n in 0..8 {
      let (running, peak) = (running.clone(), peak.clone());
      b.add_step(BuildStep::new(format!("work-{n}")).run(move |_| {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
      }));
    }
  })
  .unwrap();

  let result = chain.execute(Seeds::new(), &config(2)).await.unwrap();

  assert_eq!(result.step_timings().len(), 8);
  assert!(peak.load(Ordering::SeqCst) <= 2);
  assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[test]
fn zero_parallelism_still_runs() {
  let chain = contribution_chain();
  let result = chain.execute_blocking(Seeds::new(), &config(0)).unwrap();
  assert_eq!(result.get::<Compiled>(), Some(&Compiled(PRODUCERS)));
}

#[tokio::test]
async fn self_consuming_producer_sees_other_contributions() {
  let chain = build(|b| {
    b.add_step(BuildStep::new("base").produces::<Feature>().run(|ctx| {
      ctx.produce(Feature("base".into()))?;
      Ok(())
    }))
    .add_step(
      BuildStep::new("extend")
        .produces::<Feature>()
        .consumes::<Feature>()
        .run(|ctx| {
          let seen = ctx.consume_all::<Feature>()?.len();
          ctx.produce(Feature(format!("extend-after-{seen}")))?;
          Ok(())
        }),
    );
  })
  .unwrap();

  let result = chain.execute(Seeds::new(), &config(4)).await.unwrap();
  let features: Vec<&str> = result.get_all::<Feature>().iter().map(|f| f.0.as_str()).collect();
  assert_eq!(features, vec!["base", "extend-after-1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn independent_chains_execute_concurrently() {
  let chain = Arc::new(contribution_chain());

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let chain = chain.clone();
      tokio::spawn(async move { chain.execute(Seeds::new(), &config(4)).await.map(|r| r.get::<Compiled>().cloned()) })
    })
    .collect();

  for handle in handles {
    let compiled = handle.await.unwrap().unwrap();
    assert_eq!(compiled, Some(Compiled(PRODUCERS)));
  }
}
