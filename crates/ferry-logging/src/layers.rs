//! Custom tracing layers for Ferry nodes

use tracing::{Subscriber, span};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::{LookupSpan, SpanRef};
use tracing_subscriber::Registry;

use crate::config::JsonFields;
use crate::context::{NodeContextData, NodeContextGuard};

/// Type-erased layer over the base registry
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Layer that attaches the active node context to new spans
///
/// Spans created while a [`NodeContextGuard`] is alive carry a
/// [`NodeContextExtension`]; spans created outside any guard inherit the
/// extension of their parent.
#[derive(Debug, Default)]
pub struct NodeContextLayer;

impl NodeContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let data = NodeContextGuard::current().or_else(|| {
            span.parent()
                .and_then(|parent| node_context_of(&parent))
        });
        if let Some(data) = data {
            span.extensions_mut().insert(NodeContextExtension { data });
        }
    }
}

/// Node context recorded on a span, if any
pub fn node_context_of<'a, R>(span: &SpanRef<'a, R>) -> Option<NodeContextData>
where
    R: LookupSpan<'a>,
{
    span.extensions()
        .get::<NodeContextExtension>()
        .map(|ext| ext.data.clone())
}

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<W>(writer: W, fields: &JsonFields) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(fields.span_list)
        .flatten_event(fields.flatten)
        .with_file(fields.source_location)
        .with_line_number(fields.source_location)
        .with_thread_ids(fields.thread_ids)
        .with_thread_names(fields.thread_ids)
        .with_writer(writer)
        .boxed()
}

/// Human-readable console layer
pub fn pretty_layer(ansi: bool) -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .boxed()
}
