use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Looks up the framework attribute name for a public `android.R.attr`
/// resource id. Obfuscated packages drop attribute names from the string
/// pool; Android resolves them by id, so the decoder falls back to this
/// table.
pub fn attribute_name(res_id: u32) -> Option<&'static str> {
    ATTR_NAMES.get(&res_id).copied()
}

static ATTR_NAMES: Lazy<HashMap<u32, &'static str>> =
    Lazy::new(|| ATTR_TABLE.iter().copied().collect());

// Derived from frameworks/base/core/res/res/values/public.xml. The first
// block is contiguous; later additions are scattered across API levels.
const ATTR_TABLE: &[(u32, &str)] = &[
    (0x0101_0000, "theme"),
    (0x0101_0001, "label"),
    (0x0101_0002, "icon"),
    (0x0101_0003, "name"),
    (0x0101_0004, "manageSpaceActivity"),
    (0x0101_0005, "allowClearUserData"),
    (0x0101_0006, "permission"),
    (0x0101_0007, "readPermission"),
    (0x0101_0008, "writePermission"),
    (0x0101_0009, "protectionLevel"),
    (0x0101_000a, "permissionGroup"),
    (0x0101_000b, "sharedUserId"),
    (0x0101_000c, "hasCode"),
    (0x0101_000d, "persistent"),
    (0x0101_000e, "enabled"),
    (0x0101_000f, "debuggable"),
    (0x0101_0010, "exported"),
    (0x0101_0011, "process"),
    (0x0101_0012, "taskAffinity"),
    (0x0101_0013, "multiprocess"),
    (0x0101_0014, "finishOnTaskLaunch"),
    (0x0101_0015, "clearTaskOnLaunch"),
    (0x0101_0016, "stateNotNeeded"),
    (0x0101_0017, "excludeFromRecents"),
    (0x0101_0018, "authorities"),
    (0x0101_0019, "syncable"),
    (0x0101_001a, "initOrder"),
    (0x0101_001b, "grantUriPermissions"),
    (0x0101_001c, "priority"),
    (0x0101_001d, "launchMode"),
    (0x0101_001e, "screenOrientation"),
    (0x0101_001f, "configChanges"),
    (0x0101_0020, "description"),
    (0x0101_0021, "targetPackage"),
    (0x0101_0022, "handleProfiling"),
    (0x0101_0023, "functionalTest"),
    (0x0101_0024, "value"),
    (0x0101_0025, "resource"),
    (0x0101_0026, "mimeType"),
    (0x0101_0027, "scheme"),
    (0x0101_0028, "host"),
    (0x0101_0029, "port"),
    (0x0101_002a, "path"),
    (0x0101_002b, "pathPrefix"),
    (0x0101_002c, "pathPattern"),
    (0x0101_002d, "action"),
    (0x0101_002e, "data"),
    (0x0101_002f, "targetClass"),
    (0x0101_0030, "colorForeground"),
    (0x0101_0031, "colorBackground"),
    (0x0101_0032, "backgroundDimAmount"),
    (0x0101_0033, "disabledAlpha"),
    (0x0101_0034, "textAppearance"),
    (0x0101_0035, "textAppearanceInverse"),
    (0x0101_0036, "textColorPrimary"),
    (0x0101_0037, "textColorPrimaryDisableOnly"),
    (0x0101_0038, "textColorSecondary"),
    (0x0101_0039, "textColorPrimaryInverse"),
    (0x0101_003a, "textColorSecondaryInverse"),
    (0x0101_003b, "textColorPrimaryNoDisable"),
    (0x0101_003c, "textColorSecondaryNoDisable"),
    (0x0101_003d, "textColorPrimaryInverseNoDisable"),
    (0x0101_003e, "textColorHintInverse"),
    (0x0101_003f, "textAppearanceLarge"),
    (0x0101_0040, "textAppearanceMedium"),
    (0x0101_0041, "textAppearanceSmall"),
    (0x0101_0042, "textAppearanceLargeInverse"),
    (0x0101_0043, "textAppearanceMediumInverse"),
    (0x0101_0044, "textAppearanceSmallInverse"),
    (0x0101_0045, "textCheckMark"),
    (0x0101_0046, "textCheckMarkInverse"),
    (0x0101_0047, "buttonStyle"),
    (0x0101_0048, "buttonStyleSmall"),
    (0x0101_0049, "buttonStyleInset"),
    (0x0101_004a, "buttonStyleToggle"),
    (0x0101_004b, "galleryItemBackground"),
    (0x0101_004c, "listPreferredItemHeight"),
    (0x0101_004d, "expandableListPreferredItemPaddingLeft"),
    (0x0101_004e, "expandableListPreferredChildPaddingLeft"),
    (0x0101_004f, "expandableListPreferredItemIndicatorLeft"),
    (0x0101_0050, "expandableListPreferredItemIndicatorRight"),
    (0x0101_0051, "expandableListPreferredChildIndicatorLeft"),
    (0x0101_0052, "expandableListPreferredChildIndicatorRight"),
    (0x0101_0053, "windowBackground"),
    (0x0101_0054, "windowFrame"),
    (0x0101_0055, "windowNoTitle"),
    (0x0101_0056, "windowIsFloating"),
    (0x0101_0057, "windowIsTranslucent"),
    (0x0101_0058, "windowContentOverlay"),
    (0x0101_0059, "windowTitleSize"),
    (0x0101_005a, "windowTitleStyle"),
    (0x0101_005b, "windowTitleBackgroundStyle"),
    (0x0101_005c, "alertDialogStyle"),
    (0x0101_005d, "panelBackground"),
    (0x0101_005e, "panelFullBackground"),
    (0x0101_005f, "panelColorForeground"),
    (0x0101_0060, "panelColorBackground"),
    (0x0101_0061, "panelTextAppearance"),
    (0x0101_0062, "scrollbarSize"),
    (0x0101_0063, "scrollbarThumbHorizontal"),
    (0x0101_0064, "scrollbarThumbVertical"),
    (0x0101_0065, "scrollbarTrackHorizontal"),
    (0x0101_0066, "scrollbarTrackVertical"),
    (0x0101_0067, "scrollbarAlwaysDrawHorizontalTrack"),
    (0x0101_0068, "scrollbarAlwaysDrawVerticalTrack"),
    (0x0101_0069, "absListViewStyle"),
    (0x0101_006a, "autoCompleteTextViewStyle"),
    (0x0101_006b, "checkboxStyle"),
    (0x0101_006c, "dropDownListViewStyle"),
    (0x0101_006d, "editTextStyle"),
    (0x0101_006e, "expandableListViewStyle"),
    (0x0101_006f, "galleryStyle"),
    (0x0101_0070, "gridViewStyle"),
    (0x0101_0071, "imageButtonStyle"),
    (0x0101_0072, "imageWellStyle"),
    (0x0101_0073, "listViewStyle"),
    (0x0101_0074, "listViewWhiteStyle"),
    (0x0101_0075, "popupWindowStyle"),
    (0x0101_0076, "progressBarStyle"),
    (0x0101_0077, "progressBarStyleHorizontal"),
    (0x0101_0078, "progressBarStyleSmall"),
    (0x0101_0079, "progressBarStyleLarge"),
    (0x0101_007a, "seekBarStyle"),
    (0x0101_007b, "ratingBarStyle"),
    (0x0101_007c, "ratingBarStyleSmall"),
    (0x0101_007d, "radioButtonStyle"),
    (0x0101_007e, "scrollbarStyle"),
    (0x0101_007f, "scrollViewStyle"),
    (0x0101_0080, "spinnerStyle"),
    (0x0101_0081, "starStyle"),
    (0x0101_0082, "tabWidgetStyle"),
    (0x0101_0083, "textViewStyle"),
    (0x0101_0084, "webViewStyle"),
    (0x0101_0085, "dropDownItemStyle"),
    (0x0101_0086, "spinnerDropDownItemStyle"),
    (0x0101_0087, "dropDownHintAppearance"),
    (0x0101_0088, "spinnerItemStyle"),
    (0x0101_0089, "mapViewStyle"),
    (0x0101_020c, "minSdkVersion"),
    (0x0101_021b, "versionCode"),
    (0x0101_021c, "versionName"),
    (0x0101_0227, "reqTouchScreen"),
    (0x0101_0228, "reqKeyboardType"),
    (0x0101_0229, "reqHardKeyboard"),
    (0x0101_022a, "reqNavigation"),
    (0x0101_022b, "windowSoftInputMode"),
    (0x0101_0270, "targetSdkVersion"),
    (0x0101_0271, "maxSdkVersion"),
    (0x0101_0272, "testOnly"),
    (0x0101_0280, "allowBackup"),
    (0x0101_0281, "glEsVersion"),
    (0x0101_02b7, "installLocation"),
    (0x0101_02b8, "vmSafeMode"),
    (0x0101_02d3, "hardwareAccelerated"),
    (0x0101_035a, "largeHeap"),
    (0x0101_03af, "supportsRtl"),
    (0x0101_04ea, "extractNativeLibs"),
    (0x0101_04ec, "usesCleartextTraffic"),
    (0x0101_0527, "networkSecurityConfig"),
    (0x0101_052c, "roundIcon"),
    (0x0101_0572, "compileSdkVersion"),
    (0x0101_0573, "compileSdkVersionCodename"),
    (0x0101_057a, "appComponentFactory"),
    (0x0101_0603, "requestLegacyExternalStorage"),
];
