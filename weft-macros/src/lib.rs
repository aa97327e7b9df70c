#![allow(clippy::needless_doctest_main)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]

//! Entry-point macros for the weft runtime.

mod entry;

/// Turns an `async fn main` into a regular `main` that builds a weft
/// runtime and drives the body to completion on it.
///
/// The expansion is nothing more than the `runtime::Builder` boilerplate:
/// the function body becomes the root task passed to
/// `Runtime::block_on`. Anything beyond picking the worker count — thread
/// names, stack sizes — still calls for writing out the builder by hand.
///
/// weft has a single scheduler: the multi-threaded work-stealing pool. The
/// one knob this macro takes is `worker_threads`; leaving it out sizes the
/// pool to the machine's CPU count.
///
/// The annotated function must be `async` and take no arguments.
///
/// # Usage
///
/// ```no_run
/// #[weft::main]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// Equivalent code not using `#[weft::main]`
///
/// ```no_run
/// fn main() {
///     weft::runtime::Builder::new()
///         .try_build()
///         .unwrap()
///         .block_on(async {
///             println!("Hello world");
///         })
/// }
/// ```
///
/// ## Pinning the pool size
///
/// ```no_run
/// #[weft::main(worker_threads = 2)]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Runs an `async fn` as a `#[test]`, on a runtime of its own.
///
/// Every annotated test builds a fresh scheduler (worker pool plus reactor
/// thread), blocks on the test body, and tears the whole runtime down when
/// the body returns — tests never share workers or reactor state.
///
/// Like [`macro@main`], the only accepted option is `worker_threads`; the
/// default is one worker per CPU. Tests that depend on tasks queueing
/// behind each other usually pin it to 1.
///
/// # Usage
///
/// ```no_run
/// #[weft::test]
/// async fn my_test() {
///     assert!(true);
/// }
/// ```
///
/// Equivalent code not using `#[weft::test]`
///
/// ```no_run
/// #[test]
/// fn my_test() {
///     weft::runtime::Builder::new()
///         .try_build()
///         .unwrap()
///         .block_on(async {
///             assert!(true);
///         })
/// }
/// ```
///
/// ## Pinning the pool size
///
/// ```no_run
/// #[weft::test(worker_threads = 4)]
/// async fn my_test() {
///     assert!(true);
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}
