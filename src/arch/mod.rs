/*
 * Architecture Support
 *
 * Building blocks an embedder composes into its `Machine` implementation on
 * real hardware. Nothing in the scheduler core calls these directly; the
 * core only sees the installed `Machine`.
 */

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
