//! Bundles of step declarations installed together.

use crate::chain::BuildChainBuilder;

/// Something that contributes steps, initial items or final items to a chain.
///
/// Closures taking `&mut BuildChainBuilder` are providers too:
///
/// ```
/// use buildchain_lib::chain::BuildChainBuilder;
///
/// let mut builder = BuildChainBuilder::new();
/// builder.add_provider(&|_builder: &mut BuildChainBuilder| {});
/// ```
pub trait BuildProvider {
  fn install(&self, builder: &mut BuildChainBuilder);
}

impl<F> BuildProvider for F
where
  F: Fn(&mut BuildChainBuilder),
{
  fn install(&self, builder: &mut BuildChainBuilder) {
    self(builder)
  }
}
