//! Vector index definitions and search pipelines for Cosmos DB (MongoDB vCore).

use mongodb::bson::{doc, Bson, Document};
use std::fmt;

/// Key value marking a field as vector-indexed.
pub const COSMOS_SEARCH: &str = "cosmosSearch";

/// Hotel fields returned by vector searches.
pub const DEFAULT_PROJECTION: &[&str] = &[
    "HotelId",
    "HotelName",
    "Description",
    "Category",
    "Rating",
    "Address",
    "Tags",
    "ParkingIncluded",
];

/// Distance function used by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Similarity {
    #[default]
    Cosine,
    InnerProduct,
    Euclidean,
}

impl Similarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Similarity::Cosine => "COS",
            Similarity::InnerProduct => "IP",
            Similarity::Euclidean => "L2",
        }
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index algorithm and its build parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorIndexKind {
    /// Inverted file index: vectors clustered into `num_lists` lists.
    Ivf { num_lists: u32 },
    /// Hierarchical navigable small world graph.
    Hnsw { m: u32, ef_construction: u32 },
    /// Disk-based approximate nearest neighbour graph.
    DiskAnn { max_degree: u32, l_build: u32 },
}

impl VectorIndexKind {
    pub fn ivf() -> Self {
        VectorIndexKind::Ivf { num_lists: 10 }
    }

    pub fn hnsw() -> Self {
        VectorIndexKind::Hnsw {
            m: 16,
            ef_construction: 64,
        }
    }

    pub fn diskann() -> Self {
        VectorIndexKind::DiskAnn {
            max_degree: 20,
            l_build: 10,
        }
    }

    /// Short name used in index names.
    pub fn short_name(&self) -> &'static str {
        match self {
            VectorIndexKind::Ivf { .. } => "ivf",
            VectorIndexKind::Hnsw { .. } => "hnsw",
            VectorIndexKind::DiskAnn { .. } => "diskann",
        }
    }

    /// Value of `cosmosSearchOptions.kind`.
    pub fn option_kind(&self) -> &'static str {
        match self {
            VectorIndexKind::Ivf { .. } => "vector-ivf",
            VectorIndexKind::Hnsw { .. } => "vector-hnsw",
            VectorIndexKind::DiskAnn { .. } => "vector-diskann",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VectorIndexKind::Ivf { .. } => "IVF",
            VectorIndexKind::Hnsw { .. } => "HNSW",
            VectorIndexKind::DiskAnn { .. } => "DiskANN",
        }
    }

    fn write_options(&self, options: &mut Document) {
        match *self {
            VectorIndexKind::Ivf { num_lists } => {
                options.insert("numLists", num_lists as i32);
            }
            VectorIndexKind::Hnsw { m, ef_construction } => {
                options.insert("m", m as i32);
                options.insert("efConstruction", ef_construction as i32);
            }
            VectorIndexKind::DiskAnn {
                max_degree,
                l_build,
            } => {
                options.insert("maxDegree", max_degree as i32);
                options.insert("lBuild", l_build as i32);
            }
        }
    }
}

/// A vector index on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexSpec {
    pub kind: VectorIndexKind,
    pub field: String,
    pub dimensions: usize,
    pub similarity: Similarity,
}

impl VectorIndexSpec {
    pub fn new(kind: VectorIndexKind, field: impl Into<String>, dimensions: usize) -> Self {
        Self {
            kind,
            field: field.into(),
            dimensions,
            similarity: Similarity::Cosine,
        }
    }

    pub fn with_similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    /// `{ivf|hnsw|diskann}_index_{field}`
    pub fn index_name(&self) -> String {
        format!("{}_index_{}", self.kind.short_name(), self.field)
    }

    /// The `createIndexes` command for `collection`.
    pub fn create_indexes_command(&self, collection: &str) -> Document {
        let mut options = doc! {
            "kind": self.kind.option_kind(),
            "dimensions": self.dimensions as i32,
            "similarity": self.similarity.as_str(),
        };
        self.kind.write_options(&mut options);

        let mut key = Document::new();
        key.insert(self.field.clone(), COSMOS_SEARCH);

        doc! {
            "createIndexes": collection,
            "indexes": [{
                "name": self.index_name(),
                "key": key,
                "cosmosSearchOptions": options,
            }],
        }
    }
}

/// Query-time tuning knob for the index kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchParams {
    /// Number of IVF lists probed.
    Ivf { n_probes: u32 },
    /// HNSW candidate list size.
    Hnsw { ef_search: u32 },
    /// DiskANN search list size.
    DiskAnn { l_search: u32 },
    /// Service defaults.
    #[default]
    Default,
}

impl SearchParams {
    fn write_into(&self, search: &mut Document) {
        match *self {
            SearchParams::Ivf { n_probes } => {
                search.insert("nProbes", n_probes as i32);
            }
            SearchParams::Hnsw { ef_search } => {
                search.insert("efSearch", ef_search as i32);
            }
            SearchParams::DiskAnn { l_search } => {
                search.insert("lSearch", l_search as i32);
            }
            SearchParams::Default => {}
        }
    }
}

impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParams::Ivf { n_probes } => write!(f, "nProbes={}", n_probes),
            SearchParams::Hnsw { ef_search } => write!(f, "efSearch={}", ef_search),
            SearchParams::DiskAnn { l_search } => write!(f, "lSearch={}", l_search),
            SearchParams::Default => f.write_str("defaults"),
        }
    }
}

/// Aggregation pipeline running a vector search and projecting `projection`
/// plus the similarity `score`.
pub fn search_pipeline(
    vector: &[f32],
    path: &str,
    k: usize,
    params: SearchParams,
    projection: &[&str],
) -> Vec<Document> {
    let vector: Vec<Bson> = vector.iter().map(|&v| Bson::Double(v as f64)).collect();
    let mut search = doc! {
        "vector": vector,
        "path": path,
        "k": k as i32,
    };
    params.write_into(&mut search);

    let mut project = Document::new();
    for field in projection {
        project.insert(*field, 1);
    }
    project.insert("score", doc! { "$meta": "searchScore" });

    vec![
        doc! { "$search": { "cosmosSearch": search } },
        doc! { "$project": project },
    ]
}

/// Whether `index` is a vector index on `field`.
pub fn is_vector_index(index: &Document, field: &str) -> bool {
    index
        .get_document("key")
        .ok()
        .and_then(|key| key.get_str(field).ok())
        == Some(COSMOS_SEARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_names() {
        let field = "DescriptionVector";
        assert_eq!(
            VectorIndexSpec::new(VectorIndexKind::ivf(), field, 1536).index_name(),
            "ivf_index_DescriptionVector"
        );
        assert_eq!(
            VectorIndexSpec::new(VectorIndexKind::hnsw(), field, 1536).index_name(),
            "hnsw_index_DescriptionVector"
        );
        assert_eq!(
            VectorIndexSpec::new(VectorIndexKind::diskann(), field, 1536).index_name(),
            "diskann_index_DescriptionVector"
        );
    }

    #[test]
    fn test_ivf_command() {
        let cmd = VectorIndexSpec::new(VectorIndexKind::ivf(), "v", 1536)
            .create_indexes_command("hotels");

        assert_eq!(cmd.get_str("createIndexes").unwrap(), "hotels");
        let indexes = cmd.get_array("indexes").unwrap();
        let index = indexes[0].as_document().unwrap();
        assert_eq!(index.get_str("name").unwrap(), "ivf_index_v");
        assert_eq!(index.get_document("key").unwrap(), &doc! { "v": "cosmosSearch" });
        assert_eq!(
            index.get_document("cosmosSearchOptions").unwrap(),
            &doc! {
                "kind": "vector-ivf",
                "dimensions": 1536,
                "similarity": "COS",
                "numLists": 10,
            }
        );
    }

    #[test]
    fn test_hnsw_and_diskann_options() {
        let hnsw = VectorIndexSpec::new(VectorIndexKind::hnsw(), "v", 8)
            .with_similarity(Similarity::InnerProduct)
            .create_indexes_command("c");
        let options = hnsw.get_array("indexes").unwrap()[0]
            .as_document()
            .unwrap()
            .get_document("cosmosSearchOptions")
            .unwrap()
            .clone();
        assert_eq!(options.get_str("kind").unwrap(), "vector-hnsw");
        assert_eq!(options.get_str("similarity").unwrap(), "IP");
        assert_eq!(options.get_i32("m").unwrap(), 16);
        assert_eq!(options.get_i32("efConstruction").unwrap(), 64);

        let diskann = VectorIndexSpec::new(VectorIndexKind::diskann(), "v", 8)
            .with_similarity(Similarity::Euclidean)
            .create_indexes_command("c");
        let options = diskann.get_array("indexes").unwrap()[0]
            .as_document()
            .unwrap()
            .get_document("cosmosSearchOptions")
            .unwrap()
            .clone();
        assert_eq!(options.get_str("kind").unwrap(), "vector-diskann");
        assert_eq!(options.get_str("similarity").unwrap(), "L2");
        assert_eq!(options.get_i32("maxDegree").unwrap(), 20);
        assert_eq!(options.get_i32("lBuild").unwrap(), 10);
    }

    #[test]
    fn test_search_pipeline_shape() {
        let pipeline = search_pipeline(
            &[0.5, -0.25],
            "DescriptionVector",
            3,
            SearchParams::Ivf { n_probes: 10 },
            &["HotelName"],
        );
        assert_eq!(pipeline.len(), 2);

        let search = pipeline[0]
            .get_document("$search")
            .unwrap()
            .get_document("cosmosSearch")
            .unwrap();
        assert_eq!(
            search,
            &doc! {
                "vector": [0.5, -0.25],
                "path": "DescriptionVector",
                "k": 3,
                "nProbes": 10,
            }
        );

        assert_eq!(
            pipeline[1].get_document("$project").unwrap(),
            &doc! { "HotelName": 1, "score": { "$meta": "searchScore" } }
        );
    }

    #[test]
    fn test_search_params_keys() {
        let key_of = |params: SearchParams| {
            let pipeline = search_pipeline(&[1.0], "v", 1, params, &[]);
            let search = pipeline[0]
                .get_document("$search")
                .unwrap()
                .get_document("cosmosSearch")
                .unwrap()
                .clone();
            search.keys().last().cloned().unwrap()
        };
        assert_eq!(key_of(SearchParams::Hnsw { ef_search: 16 }), "efSearch");
        assert_eq!(key_of(SearchParams::DiskAnn { l_search: 40 }), "lSearch");
        assert_eq!(key_of(SearchParams::Default), "k");
    }

    #[test]
    fn test_is_vector_index() {
        assert!(is_vector_index(
            &doc! { "name": "ivf_index_v", "key": { "v": "cosmosSearch" } },
            "v"
        ));
        assert!(!is_vector_index(
            &doc! { "name": "_id_", "key": { "_id": 1 } },
            "v"
        ));
        assert!(!is_vector_index(
            &doc! { "name": "v_1", "key": { "v": 1 } },
            "v"
        ));
        assert!(!is_vector_index(&doc! { "name": "odd" }, "v"));
    }
}
