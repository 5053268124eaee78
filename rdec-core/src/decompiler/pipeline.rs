//! Decompilation Pipeline
//!
//! This module orchestrates one decompilation request from the analyzer's raw
//! JSON documents to the rendered pseudo-C text.
//!
//! # Pipeline Stages
//! 1. **Architecture Lookup**: resolve the request's architecture in the registry
//! 2. **Graph Loading**: validate the graph document into a [`Routine`]
//! 3. **Binding**: attach symbol and string names to address operands
//! 4. **Translation**: translate every instruction into IR statements
//! 5. **Pre-structuring Passes**: compare merging, constant propagation, dead stores
//! 6. **Structuring**: recover if/else, loops and switches from the block graph
//! 7. **Post-structuring Passes**: naming, casts, tidying
//! 8. **Rendering**: emit text or HTML into a buffer
//!
//! # Fault Boundary
//! [`DecompilationPipeline::run`] is the only place that turns failures into
//! output. Request errors (unsupported architecture, missing or malformed
//! analysis data) print their message. Internal faults and panics print a crash
//! report asking for `--issue` data, unless the request is in debug mode, in
//! which case the fault propagates unchanged. Output is only written once the
//! whole pipeline has succeeded, so a fault never leaves partial output behind.

use crate::decompiler::arch::{self, InstructionTranslator};
use crate::decompiler::binder::Binder;
use crate::decompiler::codegen::CodeGenerator;
use crate::decompiler::config::RequestContext;
use crate::decompiler::error::{DecompilerError, Diagnostics};
use crate::decompiler::ir::builder::IrBuilder;
use crate::decompiler::issue::IssueBundle;
use crate::decompiler::loader::GraphLoader;
use crate::decompiler::optimizer::Optimizer;
use crate::decompiler::routine::Routine;
use crate::decompiler::structurer::Structurer;
use serde_json::Value;
use std::cell::Cell;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// Printed in place of any output when an internal fault is caught.
pub const CRASH_REPORT: &str = "rdec has encountered an internal error and stopped.\n\
Please re-run the same command with --issue and attach its output to a bug report.";

/// Raw analyzer documents of one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestData {
    /// Block graph (`agj`).
    pub graph: Value,
    /// Cross-reference table (`isj`); `null` when absent.
    pub xrefs: Value,
    /// String table (`izj`); `null` when absent.
    pub strings: Value,
}

impl RequestData {
    /// Parse the three documents from text. Blank optional documents are empty
    /// tables; a blank graph is an empty graph.
    ///
    /// # Errors
    /// `MalformedGraph` if any document is not valid JSON.
    pub fn parse(graph: &str, xrefs: Option<&str>, strings: Option<&str>) -> Result<Self, DecompilerError> {
        fn document(text: Option<&str>) -> Result<Value, DecompilerError> {
            match text.map(str::trim) {
                Some(text) if !text.is_empty() => Ok(serde_json::from_str(text)?),
                _ => Ok(Value::Null),
            }
        }
        Ok(Self {
            graph: document(Some(graph))?,
            xrefs: document(xrefs)?,
            strings: document(strings)?,
        })
    }
}

/// Successful decompilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompilation {
    /// Rendered output, newline-terminated.
    pub text: String,
    pub diagnostics: Diagnostics,
}

/// What [`DecompilationPipeline::run`] wrote to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pseudo-C was written.
    Rendered(Diagnostics),
    /// An `--issue` bundle was written.
    Captured,
    /// A request error message was written.
    Rejected,
    /// The crash report was written.
    Crashed,
}

/// Decompilation pipeline orchestrator.
pub struct DecompilationPipeline;

impl DecompilationPipeline {
    /// Decompile one routine.
    ///
    /// # Arguments
    /// * `data` - Raw analyzer documents
    /// * `ctx` - Immutable request context
    ///
    /// # Returns
    /// `Decompilation` - Rendered text and non-fatal diagnostics
    ///
    /// # Errors
    /// Request errors (`UnsupportedArchitecture`, `EmptyGraph`, `MalformedGraph`)
    /// and `Internal` when a pipeline invariant breaks.
    #[inline(never)]
    pub fn decompile(data: &RequestData, ctx: &RequestContext) -> Result<Decompilation, DecompilerError> {
        log::info!("Starting decompilation pipeline...");

        log::info!("Step 1: Resolving architecture `{}`...", ctx.architecture);
        let arch: Box<dyn InstructionTranslator> = arch::resolve(&ctx.architecture)?;

        log::info!("Step 2: Loading graph...");
        let mut routine: Routine = GraphLoader::load(&data.graph)?;
        let xrefs = GraphLoader::load_xrefs(&data.xrefs)?;
        let strings = GraphLoader::load_strings(&data.strings)?;
        log::debug!(
            "{}: {} blocks, {} instructions",
            routine.display_name(),
            routine.blocks.len(),
            routine.instruction_count()
        );

        log::info!("Step 3: Binding cross-references and strings...");
        Binder::bind(&mut routine, &xrefs, &strings);

        log::info!("Step 4: Translating instructions...");
        let (mut ir, unsupported) = IrBuilder::build(&routine, arch.as_ref());
        if unsupported > 0 {
            log::warn!("{unsupported} instructions have no translation");
        }
        log::debug!("translated into {} statements", ir.statement_count());

        let optimizer = Optimizer::default();
        log::info!("Step 5: Running pre-structuring passes...");
        let pre = optimizer.pre_structuring(&mut ir, &routine, arch.as_ref());
        log::debug!("pre-structuring: {pre:?}, {} statements left", ir.statement_count());

        log::info!("Step 6: Structuring control flow...");
        let mut structured = Structurer::structure(&routine, &ir, &ctx.structuring)?;
        if structured.approximate_regions > 0 {
            log::warn!(
                "control flow of {} approximated in {} places",
                routine.display_name(),
                structured.approximate_regions
            );
        }

        log::info!("Step 7: Running post-structuring passes...");
        let post = optimizer.post_structuring(&mut structured.root, arch.as_ref(), &ctx.render);
        log::debug!("post-structuring: {post:?}");

        log::info!("Step 8: Rendering...");
        let text = CodeGenerator::new(&routine, &ctx.render).generate_function(
            &structured.root,
            arch.name(),
            ctx.target_address,
        )?;

        Ok(Decompilation {
            text,
            diagnostics: Diagnostics {
                unsupported_instructions: unsupported,
                approximate_regions: structured.approximate_regions,
            },
        })
    }

    /// Text of the `--issue` bundle for a request.
    ///
    /// # Errors
    /// `Internal` if the bundle cannot be serialized.
    pub fn issue(data: &RequestData, ctx: &RequestContext) -> Result<String, DecompilerError> {
        let mut text = IssueBundle::capture(data, &ctx.architecture).to_json()?;
        text.push('\n');
        Ok(text)
    }

    /// Run a request and write its result to `sink`.
    ///
    /// # Arguments
    /// * `data` - Raw analyzer documents
    /// * `ctx` - Immutable request context
    /// * `issue` - Write the issue bundle instead of decompiling
    /// * `sink` - Output destination
    ///
    /// # Errors
    /// `Io` if the sink fails. In debug mode internal faults are returned and
    /// panics resumed instead of being reported as a crash.
    pub fn run(
        data: &RequestData,
        ctx: &RequestContext,
        issue: bool,
        sink: &mut dyn Write,
    ) -> Result<RunOutcome, DecompilerError> {
        if issue {
            let text = Self::issue(data, ctx)?;
            sink.write_all(text.as_bytes())?;
            return Ok(RunOutcome::Captured);
        }

        Self::guarded(ctx, sink, || Self::decompile(data, ctx))
    }

    /// Fault boundary around one decompilation.
    ///
    /// Request errors are written as their message. Internal errors and panics
    /// become the crash report, or propagate unchanged in debug mode.
    fn guarded(
        ctx: &RequestContext,
        sink: &mut dyn Write,
        work: impl FnOnce() -> Result<Decompilation, DecompilerError>,
    ) -> Result<RunOutcome, DecompilerError> {
        let result = if ctx.debug {
            panic::catch_unwind(AssertUnwindSafe(work))
        } else {
            install_quiet_hook();
            QUIET_PANICS.with(|quiet| quiet.set(true));
            let result = panic::catch_unwind(AssertUnwindSafe(work));
            QUIET_PANICS.with(|quiet| quiet.set(false));
            result
        };

        let (text, outcome) = match result {
            Ok(Ok(done)) => (done.text, RunOutcome::Rendered(done.diagnostics)),
            Ok(Err(err)) if !err.is_internal() => (format!("{err}\n"), RunOutcome::Rejected),
            Ok(Err(err)) => {
                if ctx.debug {
                    return Err(err);
                }
                log::error!("{err}");
                (format!("{CRASH_REPORT}\n"), RunOutcome::Crashed)
            }
            Err(payload) => {
                if ctx.debug {
                    panic::resume_unwind(payload);
                }
                log::error!("decompiler panicked: {}", panic_message(payload.as_ref()));
                (format!("{CRASH_REPORT}\n"), RunOutcome::Crashed)
            }
        };
        sink.write_all(text.as_bytes())?;
        sink.flush()?;
        Ok(outcome)
    }
}

thread_local! {
    /// Set while a non-debug request runs, so a caught panic prints nothing.
    static QUIET_PANICS: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Wrap the process panic hook once so it stays silent on threads that are
/// inside a non-debug [`DecompilationPipeline::run`]. Other threads, and debug
/// requests, keep the previous hook's output.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !QUIET_PANICS.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single_block() -> RequestData {
        RequestData {
            graph: json!([{ "address": 0x1000, "instructions": [
                { "address": 0x1000, "mnemonic": "mov", "operands": ["r0", "1"] },
                { "address": 0x1005, "mnemonic": "ret" } ] }]),
            ..RequestData::default()
        }
    }

    #[test]
    fn request_errors_are_written_as_messages() {
        let mut out: Vec<u8> = Vec::new();
        let outcome = DecompilationPipeline::run(&RequestData::default(), &RequestContext::new("x86"), false, &mut out)
            .unwrap();
        assert_eq!(outcome, RunOutcome::Rejected);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Error: no data available.\nPlease analyze the function/binary first.\n"
        );
    }

    #[test]
    fn architecture_is_checked_before_data() {
        let err = DecompilationPipeline::decompile(&RequestData::default(), &RequestContext::new("z80")).unwrap_err();
        assert!(matches!(err, DecompilerError::UnsupportedArchitecture { .. }));
    }

    #[test]
    fn rendered_output_reaches_sink() {
        let mut out: Vec<u8> = Vec::new();
        let outcome = DecompilationPipeline::run(&single_block(), &RequestContext::new("x86"), false, &mut out).unwrap();
        assert_eq!(outcome, RunOutcome::Rendered(Diagnostics::default()));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("    r0 = 1;\n    return;\n"));
    }

    #[test]
    fn issue_mode_skips_decompilation() {
        let mut out: Vec<u8> = Vec::new();
        let outcome = DecompilationPipeline::run(&single_block(), &RequestContext::new("z80"), true, &mut out).unwrap();
        assert_eq!(outcome, RunOutcome::Captured);
        let bundle = IssueBundle::from_json(&String::from_utf8(out).unwrap()).unwrap();
        assert_eq!(bundle.arch, "z80");
        assert_eq!(bundle.request_data(), single_block());
    }

    fn debug_context() -> RequestContext {
        let mut ctx = RequestContext::new("x86");
        ctx.debug = true;
        ctx
    }

    #[test]
    fn internal_error_becomes_crash_report() {
        let mut out: Vec<u8> = Vec::new();
        let outcome = DecompilationPipeline::guarded(&RequestContext::new("x86"), &mut out, || {
            Err(DecompilerError::internal("statement lost during structuring"))
        })
        .unwrap();
        assert_eq!(outcome, RunOutcome::Crashed);
        assert_eq!(String::from_utf8(out).unwrap(), format!("{CRASH_REPORT}\n"));
    }

    #[test]
    fn panic_becomes_crash_report_quietly() {
        let mut out: Vec<u8> = Vec::new();
        let outcome = DecompilationPipeline::guarded(&RequestContext::new("x86"), &mut out, || {
            panic!("region walk left the graph")
        })
        .unwrap();
        assert_eq!(outcome, RunOutcome::Crashed);
        assert_eq!(String::from_utf8(out).unwrap(), format!("{CRASH_REPORT}\n"));
        assert!(QUIET_HOOK.is_completed());
        assert!(!QUIET_PANICS.with(Cell::get));
    }

    #[test]
    fn debug_mode_returns_internal_error() {
        let mut out: Vec<u8> = Vec::new();
        let err = DecompilationPipeline::guarded(&debug_context(), &mut out, || {
            Err(DecompilerError::internal("statement lost during structuring"))
        })
        .unwrap_err();
        assert!(err.is_internal());
        assert!(out.is_empty());
    }

    #[test]
    fn debug_mode_resumes_panic() {
        let mut out: Vec<u8> = Vec::new();
        let resumed = panic::catch_unwind(AssertUnwindSafe(|| {
            DecompilationPipeline::guarded(&debug_context(), &mut out, || panic!("region walk left the graph"))
        }));
        let payload = resumed.unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "region walk left the graph");
        assert!(out.is_empty());
    }

    #[test]
    fn request_error_is_not_a_crash_in_debug_mode() {
        let mut out: Vec<u8> = Vec::new();
        let outcome =
            DecompilationPipeline::guarded(&debug_context(), &mut out, || Err(DecompilerError::EmptyGraph)).unwrap();
        assert_eq!(outcome, RunOutcome::Rejected);
        assert!(String::from_utf8(out).unwrap().starts_with("Error: no data available."));
    }

    #[test]
    fn blank_documents_parse_as_null() {
        let data = RequestData::parse("[]", Some("  "), None).unwrap();
        assert_eq!(data.graph, json!([]));
        assert_eq!(data.xrefs, Value::Null);
        assert!(RequestData::parse("{", None, None).is_err());
    }
}
