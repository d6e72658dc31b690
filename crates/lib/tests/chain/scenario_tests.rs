//! End-to-end scenarios: validation outcomes and results of successful builds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use buildchain_lib::prelude::*;
use buildchain_lib::step::EdgeStrength;

use super::common::*;

#[tokio::test]
async fn producer_runs_before_consumer() {
  let recorder = Recorder::new();
  let (r1, r2) = (recorder.clone(), recorder.clone());

  let chain = build(|b| {
    b.add_step(
      BuildStep::new("consumer")
        .consumes::<Sources>()
        .produces::<Compiled>()
        .run(move |ctx| {
          r2.record(ctx.step_id());
          let count = ctx.consume::<Sources>()?.0.len();
          ctx.produce(Compiled(count))?;
          Ok(())
        }),
    )
    .add_step(BuildStep::new("producer").produces::<Sources>().run(move |ctx| {
      r1.record(ctx.step_id());
      ctx.produce(Sources(vec!["a.rs".into(), "b.rs".into()]))?;
      Ok(())
    }));
  })
  .unwrap();

  let result = chain.execute(Seeds::new(), &config(4)).await.unwrap();

  assert_eq!(result.get::<Sources>().unwrap().0.len(), 2);
  assert_eq!(result.get::<Compiled>(), Some(&Compiled(2)));
  assert_eq!(recorder.events(), vec!["producer", "consumer"]);
}

#[test]
fn ambiguous_producers_fail_the_build() {
  let err = build(|b| {
    b.add_step(BuildStep::new("a").produces::<Sources>().run(|_| Ok(())))
      .add_step(BuildStep::new("b").produces::<Sources>().run(|_| Ok(())));
  })
  .unwrap_err();

  let errors = error_messages(err.diagnostics());
  assert_eq!(errors.len(), 1);
  assert!(errors[0].starts_with("multiple producers of item Sources"));
  assert!(errors[0].contains("\"a\"") && errors[0].contains("\"b\""));
}

#[test]
fn unresolved_requirement_fails_the_build() {
  let err = build(|b| {
    b.add_step(BuildStep::new("a").consumes::<Sources>().run(|_| Ok(())));
  })
  .unwrap_err();

  assert_eq!(
    error_messages(err.diagnostics()),
    vec!["step \"a\" requires item Sources, but no step produces it and it is not an initial item"]
  );
}

#[test]
fn cycle_fails_the_build_before_anything_runs() {
  let ran = Arc::new(AtomicBool::new(false));
  let (ran_a, ran_b) = (ran.clone(), ran.clone());

  let err = build(|b| {
    b.add_step(
      BuildStep::new("a")
        .consumes::<Compiled>()
        .produces::<Sources>()
        .run(move |_| {
          ran_a.store(true, Ordering::SeqCst);
          Ok(())
        }),
    )
    .add_step(
      BuildStep::new("b")
        .consumes::<Sources>()
        .produces::<Compiled>()
        .run(move |_| {
          ran_b.store(true, Ordering::SeqCst);
          Ok(())
        }),
    );
  })
  .unwrap_err();

  let errors = error_messages(err.diagnostics());
  assert_eq!(errors.len(), 1);
  assert_eq!(
    errors[0],
    "dependency cycle detected: \"a\" produces Sources for \"b\", \"b\" produces Compiled for \"a\""
  );
  assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn every_contribution_reaches_the_result() {
  let chain = build(|b| {
    for name in ["web", "db", "cache"] {
      b.add_step(BuildStep::new(name).produces::<Feature>().run(move |ctx| {
        ctx.produce(Feature(name.to_string()))?;
        Ok(())
      }));
    }
  })
  .unwrap();

  let result = chain.execute(Seeds::new(), &config(3)).await.unwrap();
  let features: Vec<&str> = result.get_all::<Feature>().iter().map(|f| f.0.as_str()).collect();
  assert_eq!(features, vec!["cache", "db", "web"]);
}

#[tokio::test]
async fn executing_twice_gives_identical_results() {
  let chain = build(|b| {
    b.add_initial::<Sources>()
      .add_step(
        BuildStep::new("compile")
          .consumes::<Sources>()
          .produces::<Compiled>()
          .run(|ctx| {
            let count = ctx.consume::<Sources>()?.0.len();
            ctx.produce(Compiled(count))?;
            Ok(())
          }),
      )
      .add_step(
        BuildStep::new("package")
          .consumes::<Compiled>()
          .consumes_optional::<Feature>()
          .produces::<Packaged>()
          .run(|ctx| {
            let compiled = ctx.consume::<Compiled>()?.0;
            let features = ctx.consume_all::<Feature>()?.len();
            ctx.produce(Packaged(format!("{compiled} units, {features} features")))?;
            Ok(())
          }),
      );
  })
  .unwrap();

  let seeds = Seeds::new().with(Sources(vec!["main.rs".into()]));
  let first = chain.execute(seeds.clone(), &config(2)).await.unwrap();
  let second = chain.execute(seeds, &config(2)).await.unwrap();

  assert_eq!(first.get::<Packaged>(), Some(&Packaged("1 units, 0 features".into())));
  assert_eq!(first.get::<Packaged>(), second.get::<Packaged>());
  assert_eq!(first.item_ids(), second.item_ids());
}

#[tokio::test]
async fn weak_dependencies_never_require_a_producer() {
  let chain = build(|b| {
    b.add_step(
      BuildStep::new("report")
        .consumes_optional::<Compiled>()
        .after_produce::<Feature>()
        .produces::<Packaged>()
        .run(|ctx| {
          let compiled = format!("{:?}", ctx.try_consume::<Compiled>()?.map(|c| c.0));
          ctx.produce(Packaged(compiled))?;
          Ok(())
        }),
    );
  })
  .unwrap();

  assert!(chain.diagnostics().is_empty());
  let result = chain.execute(Seeds::new(), &config(1)).await.unwrap();
  assert_eq!(result.get::<Packaged>(), Some(&Packaged("None".into())));
}

#[tokio::test]
async fn ordering_only_dependencies_order_without_sharing() {
  let recorder = Recorder::new();

  let chain = build(|b| {
    b.add_step(recorder.step("announce").before_consume::<Ready>())
      .add_step(recorder.step("late").after_produce::<Feature>())
      .add_step(recorder.step("early").produces::<Feature>())
      .add_step(recorder.step("wait").consumes_optional::<Ready>());
  })
  .unwrap();

  assert_eq!(chain.dependencies("late"), vec![("early", EdgeStrength::Weak)]);
  assert_eq!(chain.dependencies("wait"), vec![("announce", EdgeStrength::Weak)]);

  chain.execute(Seeds::new(), &config(1)).await.unwrap();
  assert!(recorder.position("early") < recorder.position("late"));
  assert!(recorder.position("announce") < recorder.position("wait"));
}

#[tokio::test]
async fn final_items_select_the_steps_that_run() {
  let recorder = Recorder::new();
  let r = recorder.clone();

  let chain = build(|b| {
    b.add_step(BuildStep::new("compile").produces::<Compiled>().run(move |ctx| {
      r.record(ctx.step_id());
      ctx.produce(Compiled(1))?;
      Ok(())
    }))
    .add_step(recorder.step("docs").produces::<Feature>())
    .add_final::<Compiled>();
  })
  .unwrap();

  assert_eq!(chain.step_ids(), vec!["compile"]);
  let result = chain.execute(Seeds::new(), &config(2)).await.unwrap();

  assert_eq!(recorder.events(), vec!["compile"]);
  assert!(
    result
      .diagnostics()
      .iter()
      .any(|d| d.level() == Level::Note && d.message().contains("\"docs\" is not needed"))
  );
}

#[tokio::test]
async fn overridable_producer_is_replaced() {
  let chain = build(|b| {
    b.add_step(
      BuildStep::new("default-sources")
        .produces_with::<Sources>(&[ProduceFlag::Overridable])
        .run(|ctx| {
          ctx.produce(Sources(vec!["default.rs".into()]))?;
          Ok(())
        }),
    )
    .add_step(BuildStep::new("custom-sources").produces::<Sources>().run(|ctx| {
      ctx.produce(Sources(vec!["custom.rs".into()]))?;
      Ok(())
    }))
    .add_step(
      BuildStep::new("compile")
        .consumes::<Sources>()
        .produces::<Compiled>()
        .run(|ctx| {
          let count = ctx.consume::<Sources>()?.0.len();
          ctx.produce(Compiled(count))?;
          Ok(())
        }),
    )
    .add_final::<Compiled>();
  })
  .unwrap();

  assert_eq!(chain.step_ids(), vec!["custom-sources", "compile"]);
  assert!(chain.diagnostics().iter().any(|d| d.level() == Level::Warn));

  let result = chain.execute(Seeds::new(), &config(2)).await.unwrap();
  assert_eq!(result.get::<Sources>().unwrap().0, vec!["custom.rs".to_string()]);
}

#[test]
fn empty_items_mark_presence() {
  let chain = build(|b| {
    b.add_step(BuildStep::new("prepare").produces::<Ready>().run(|ctx| {
      ctx.produce(Ready)?;
      Ok(())
    }))
    .add_step(
      BuildStep::new("check")
        .consumes::<Ready>()
        .produces::<Packaged>()
        .run(|ctx| {
          let ready = ctx.is_present::<Ready>()?;
          ctx.produce(Packaged(ready.to_string()))?;
          Ok(())
        }),
    );
  })
  .unwrap();

  let result = chain.execute_blocking(Seeds::new(), &config(2)).unwrap();
  assert!(result.contains::<Ready>());
  assert_eq!(result.get::<Packaged>(), Some(&Packaged("true".into())));
}

#[test]
fn closeables_are_handed_to_the_caller() {
  let closed = Arc::new(AtomicBool::new(false));
  let handle = closed.clone();

  let chain = build(|b| {
    b.add_step(BuildStep::new("open").produces::<Resource>().run(move |ctx| {
      ctx.produce_closeable(Resource { closed: handle.clone() })?;
      Ok(())
    }));
  })
  .unwrap();

  let mut result = chain.execute_blocking(Seeds::new(), &config(1)).unwrap();
  assert_eq!(result.closeables().len(), 1);
  assert!(!closed.load(Ordering::SeqCst));

  assert!(result.close_all().is_empty());
  assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn waves_cover_every_step_once() {
  let chain = build(|b| {
    b.add_step(BuildStep::new("sources").produces::<Sources>().run(|_| Ok(())))
      .add_step(BuildStep::new("feature").produces::<Feature>().run(|_| Ok(())))
      .add_step(
        BuildStep::new("compile")
          .consumes::<Sources>()
          .produces::<Compiled>()
          .run(|_| Ok(())),
      )
      .add_step(
        BuildStep::new("package")
          .consumes::<Compiled>()
          .consumes::<Feature>()
          .run(|_| Ok(())),
      );
  })
  .unwrap();

  let waves = chain.execution_waves();
  let mut flattened: Vec<&str> = waves.iter().flatten().copied().collect();
  flattened.sort_unstable();
  assert_eq!(flattened, vec!["compile", "feature", "package", "sources"]);
  assert_eq!(waves.len(), 3);
  assert!(chain.diagnostics().iter().all(|d| !d.is_error()));
}
