//! WMS GetMap service for quadtree-tiled imagery

use crate::core::config::ServiceConfig;
use crate::core::error::Error;
use crate::math::Aabb;
use crate::streaming::service::ServiceType;
use crate::tiles::Tile;

/// Builds GetMap URLs from a template.
///
/// The template carries `{layers}`, `{styles}` and `{bbox}` placeholders;
/// the bbox is written as `minX,minY,maxX,maxY` of the tile's footprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WmsService {
    template: String,
    layers: String,
    styles: String,
}

impl WmsService {
    pub fn new(template: impl Into<String>, layers: impl Into<String>, styles: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            layers: layers.into(),
            styles: styles.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, Error> {
        if !config.wms_template.contains("{bbox}") {
            return Err(Error::Config(format!(
                "WMS template must contain {{bbox}}: {:?}",
                config.wms_template
            )));
        }
        Ok(Self::new(&config.wms_template, &config.wms_layers, &config.wms_styles))
    }

    pub fn get_map_url(&self, bbox: &Aabb) -> String {
        let bbox = format!("{},{},{},{}", bbox.min.x, bbox.min.y, bbox.max.x, bbox.max.y);
        self.template
            .replace("{layers}", &self.layers)
            .replace("{styles}", &self.styles)
            .replace("{bbox}", &bbox)
    }
}

impl ServiceType for WmsService {
    fn name(&self) -> &str {
        "wms"
    }

    fn content_url(&self, tile: Tile<'_>) -> Option<String> {
        Some(self.get_map_url(&tile.world_box()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tileset::ExplicitQuadTreeTilesBuilder;
    use crate::tiles::ColdStorage;

    const TEMPLATE: &str =
        "https://maps.example.com/wms?SERVICE=WMS&REQUEST=GetMap&LAYERS={layers}&STYLES={styles}&BBOX={bbox}&WIDTH=256&HEIGHT=256";

    #[test]
    fn test_get_map_url() {
        let wms = WmsService::new(TEMPLATE, "roads,water", "");
        let url = wms.get_map_url(&Aabb::from_planar(-10.5, 20.0, 0.0, 32.25));
        assert_eq!(
            url,
            "https://maps.example.com/wms?SERVICE=WMS&REQUEST=GetMap&LAYERS=roads,water&STYLES=&BBOX=-10.5,20,0,32.25&WIDTH=256&HEIGHT=256"
        );
    }

    #[test]
    fn test_quadtree_tiles_get_distinct_urls() {
        let mut storage = ColdStorage::new();
        ExplicitQuadTreeTilesBuilder::new(Aabb::from_planar(0.0, 0.0, 4.0, 4.0), 1)
            .build(&mut storage)
            .unwrap();
        let wms = WmsService::new("{bbox}", "l", "s");

        let urls: Vec<String> = storage.iter().map(|tile| wms.content_url(tile).unwrap()).collect();
        assert_eq!(urls, vec!["0,0,4,4", "0,0,2,2", "2,0,4,2", "0,2,2,4", "2,2,4,4"]);
    }

    #[test]
    fn test_from_config_requires_bbox() {
        let mut config = ServiceConfig::default();
        config.wms_template = "https://example.com/wms?LAYERS={layers}".to_string();
        assert!(matches!(WmsService::from_config(&config), Err(Error::Config(_))));

        config.wms_template = TEMPLATE.to_string();
        config.wms_layers = "base".to_string();
        let wms = WmsService::from_config(&config).unwrap();
        assert!(wms.get_map_url(&Aabb::from_planar(0.0, 0.0, 1.0, 1.0)).contains("LAYERS=base"));
    }
}
