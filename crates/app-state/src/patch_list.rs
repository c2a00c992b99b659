//! Extraction of a collection's patches from a transport container.

use log::debug;
use prost::Message;
use syncd_core::CollectionName;

use crate::error::{AppStateError, Result};
use crate::node::Node;
use crate::proto::{ExternalBlobReference, SyncdMutations, SyncdPatch, SyncdSnapshot};

/// Downloads blobs that the server stored out of band (large snapshots and
/// mutation lists).
pub trait ExternalBlobFetcher: Send + Sync {
    fn download(&self, reference: &ExternalBlobReference) -> Result<Vec<u8>>;
}

/// Patches of one collection as received from the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchList {
    pub name: Option<CollectionName>,
    pub has_more_patches: bool,
    pub patches: Vec<SyncdPatch>,
    pub snapshot: Option<SyncdSnapshot>,
}

/// A parsed list together with the container attribute failures, if any.
#[derive(Debug, Clone, Default)]
pub struct ParsedPatchList {
    pub list: PatchList,
    pub attribute_errors: Vec<String>,
}

impl ParsedPatchList {
    /// Fail when any container attribute could not be read.
    pub fn into_result(self) -> Result<PatchList> {
        if self.attribute_errors.is_empty() {
            Ok(self.list)
        } else {
            Err(AppStateError::Attributes(self.attribute_errors))
        }
    }
}

fn download(
    fetcher: Option<&dyn ExternalBlobFetcher>,
    reference: &ExternalBlobReference,
) -> Result<Vec<u8>> {
    let fetcher = fetcher.ok_or_else(|| {
        AppStateError::malformed("external blob referenced but no fetcher was provided")
    })?;
    debug!(
        "[AppState] Downloading external blob ({} bytes)",
        reference.file_size_bytes()
    );
    fetcher.download(reference)
}

fn parse_snapshot(
    collection: &Node,
    fetcher: Option<&dyn ExternalBlobFetcher>,
) -> Result<Option<SyncdSnapshot>> {
    let Some(raw) = collection.child_by_tag("snapshot").and_then(Node::bytes) else {
        return Ok(None);
    };
    let reference = ExternalBlobReference::decode(raw)?;
    let data = download(fetcher, &reference)?;
    Ok(Some(SyncdSnapshot::decode(data.as_slice())?))
}

fn parse_patch(
    raw: &[u8],
    fetcher: Option<&dyn ExternalBlobFetcher>,
) -> Result<SyncdPatch> {
    let mut patch = SyncdPatch::decode(raw)?;
    if let (Some(reference), Some(fetcher)) = (patch.external_mutations.as_ref(), fetcher) {
        let data = download(Some(fetcher), reference)?;
        let downloaded = SyncdMutations::decode(data.as_slice())?;
        if downloaded.mutations.is_empty() {
            return Err(AppStateError::malformed(
                "didn't get any mutations from download",
            ));
        }
        patch.mutations = downloaded.mutations;
    }
    Ok(patch)
}

/// Parse a `collection` container into a [`PatchList`].
///
/// Malformed patches fail the whole call. Attribute failures are returned
/// next to the partially filled list instead.
pub fn parse_patch_list(
    collection: &Node,
    fetcher: Option<&dyn ExternalBlobFetcher>,
) -> Result<ParsedPatchList> {
    let snapshot = parse_snapshot(collection, fetcher)?;

    let patch_nodes = collection
        .child_by_tag("patches")
        .map(Node::children)
        .unwrap_or_default();
    let mut patches = Vec::with_capacity(patch_nodes.len());
    for (i, node) in patch_nodes.iter().enumerate() {
        let Some(raw) = node.bytes().filter(|_| node.tag == "patch") else {
            continue;
        };
        let patch = parse_patch(raw, fetcher).map_err(|err| AppStateError::PatchList {
            position: i + 1,
            source: Box::new(err),
        })?;
        patches.push(patch);
    }

    let mut attrs = collection.attr_reader();
    let raw_name = attrs.string("name");
    let name = if raw_name.is_empty() {
        None
    } else {
        match raw_name.parse::<CollectionName>() {
            Ok(name) => Some(name),
            Err(err) => {
                attrs.push_error(err.to_string());
                None
            }
        }
    };
    let has_more_patches = attrs.optional_bool("has_more_patches");

    Ok(ParsedPatchList {
        list: PatchList {
            name,
            has_more_patches,
            patches,
            snapshot,
        },
        attribute_errors: attrs.into_errors(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{SyncdMutation, SyncdVersion};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedFetcher {
        body: Vec<u8>,
        calls: AtomicUsize,
    }

    impl ExternalBlobFetcher for CannedFetcher {
        fn download(&self, _reference: &ExternalBlobReference) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    fn patch_bytes(version: u64) -> Vec<u8> {
        SyncdPatch {
            version: Some(SyncdVersion {
                version: Some(version),
            }),
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn collection(children: Vec<Node>) -> Node {
        Node::new("collection")
            .with_attr("name", "regular_high")
            .with_attr("has_more_patches", "true")
            .with_children(vec![Node::new("patches").with_children(children)])
    }

    #[test]
    fn parses_patches_in_order_and_skips_other_children() {
        let node = collection(vec![
            Node::new("patch").with_bytes(patch_bytes(3)),
            Node::new("something_new").with_bytes(vec![0xFF]),
            Node::new("patch").with_bytes(patch_bytes(4)),
        ]);

        let list = parse_patch_list(&node, None)
            .expect("parse")
            .into_result()
            .expect("attributes");

        assert_eq!(list.name, Some(CollectionName::RegularHigh));
        assert!(list.has_more_patches);
        assert!(list.snapshot.is_none());
        let versions: Vec<u64> = list.patches.iter().map(SyncdPatch::version_number).collect();
        assert_eq!(versions, vec![3, 4]);
    }

    #[test]
    fn malformed_patch_reports_its_position() {
        let node = collection(vec![
            Node::new("patch").with_bytes(patch_bytes(3)),
            Node::new("patch").with_bytes(vec![0x0A, 0xFF]),
        ]);

        let err = parse_patch_list(&node, None).unwrap_err();
        assert!(matches!(err, AppStateError::PatchList { position: 2, .. }));
        assert!(err.to_string().starts_with("failed to parse patch #2"));
    }

    #[test]
    fn attribute_errors_are_deferred() {
        let node = Node::new("collection")
            .with_attr("name", "regular_medium")
            .with_children(vec![Node::new("patches").with_children(vec![
                Node::new("patch").with_bytes(patch_bytes(1)),
            ])]);

        let parsed = parse_patch_list(&node, None).expect("parse");
        assert_eq!(parsed.list.patches.len(), 1);
        assert_eq!(parsed.list.name, None);
        assert_eq!(parsed.attribute_errors.len(), 1);
        assert!(matches!(
            parsed.into_result(),
            Err(AppStateError::Attributes(_))
        ));
    }

    #[test]
    fn external_mutations_are_downloaded() {
        let mutations = SyncdMutations {
            mutations: vec![SyncdMutation::default(), SyncdMutation::default()],
        };
        let fetcher = CannedFetcher {
            body: mutations.encode_to_vec(),
            calls: AtomicUsize::new(0),
        };
        let patch = SyncdPatch {
            external_mutations: Some(ExternalBlobReference::default()),
            ..Default::default()
        };
        let node = collection(vec![Node::new("patch").with_bytes(patch.encode_to_vec())]);

        let list = parse_patch_list(&node, Some(&fetcher))
            .expect("parse")
            .into_result()
            .expect("attributes");

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(list.patches[0].mutations.len(), 2);
    }

    #[test]
    fn empty_external_download_is_an_error() {
        let fetcher = CannedFetcher {
            body: Vec::new(),
            calls: AtomicUsize::new(0),
        };
        let patch = SyncdPatch {
            external_mutations: Some(ExternalBlobReference::default()),
            ..Default::default()
        };
        let node = collection(vec![Node::new("patch").with_bytes(patch.encode_to_vec())]);

        let err = parse_patch_list(&node, Some(&fetcher)).unwrap_err();
        assert!(matches!(err.root(), AppStateError::Malformed(_)));
    }

    #[test]
    fn snapshot_is_downloaded_through_fetcher() {
        let snapshot = SyncdSnapshot {
            version: Some(SyncdVersion { version: Some(7) }),
            ..Default::default()
        };
        let fetcher = CannedFetcher {
            body: snapshot.encode_to_vec(),
            calls: AtomicUsize::new(0),
        };
        let node = Node::new("collection")
            .with_attr("name", "regular")
            .with_children(vec![Node::new("snapshot")
                .with_bytes(ExternalBlobReference::default().encode_to_vec())]);

        let list = parse_patch_list(&node, Some(&fetcher))
            .expect("parse")
            .into_result()
            .expect("attributes");
        assert_eq!(list.snapshot.map(|s| s.version_number()), Some(7));
        assert!(list.patches.is_empty());
    }
}
