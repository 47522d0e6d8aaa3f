use bson::{Bson, Document, doc};

pub const TABLE: &str = "\"bench\".\"accounts\"";

/// A filter touching every operator family, `width` times over.
pub fn wide_filter(width: usize) -> Document {
    let clauses: Vec<Bson> = (0..width)
        .map(|i| {
            let mut clause = Document::new();
            clause.insert(format!("status{i}"), "active");
            clause.insert(format!("revenue{i}"), doc! { "$gte": 1000, "$lt": 250_000.5 });
            clause.insert(format!("tags{i}"), doc! { "$in": ["a", "b", "c"] });
            clause.insert(format!("deleted{i}"), doc! { "$exists": false });
            clause.insert(format!("name{i}"), doc! { "$regex": "^acme", "$options": "i" });
            Bson::Document(clause)
        })
        .collect();
    doc! { "$or": clauses }
}

pub fn group_pipeline() -> Vec<Bson> {
    vec![
        Bson::Document(doc! { "$match": { "status": "active", "revenue": { "$gt": 0 } } }),
        Bson::Document(doc! {
            "$group": {
                "_id": { "year": { "$dateToString": { "format": "%Y", "date": "$created" } } },
                "total": { "$sum": "$revenue" },
                "avg": { "$avg": { "$multiply": ["$revenue", 1.1] } },
            }
        }),
        Bson::Document(doc! { "$sort": { "total": -1 } }),
        Bson::Document(doc! { "$limit": 10 }),
    ]
}
